//! The defaults asset: LUTs, kernels and matrices shipped as one JSON file
//! and loaded once, lazily, as process-wide immutable state
//! (`spec.md` §5 "Shared-resource policy", §6 "Defaults asset").
//!
//! This is a collaborator's concern in the distilled sense (the JSON file
//! itself is produced elsewhere), but loading and caching it is squarely
//! this crate's job: every finalisation step that needs a named filter,
//! gamma curve or colour matrix reads it through [`defaults`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct Debin {
    pub coefs: [i32; 4],
}

#[derive(Clone, Debug, Deserialize)]
pub struct DemosaicDefaults {
    pub sharper: u8,
    pub fc_mode: u8,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FalseColour {
    pub distance: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct GammaPoint {
    pub x: u16,
    pub y: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Gamma {
    pub lut: Vec<GammaPoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SmartSelection {
    pub downscale: Vec<u32>,
    pub filter: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResampleDefaults {
    pub filters: std::collections::BTreeMap<String, Vec<i16>>,
    pub smart_selection: SmartSelection,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SharpenFilterDefaults {
    pub kernel: [i16; 9],
    pub offset: i16,
    pub threshold_slope: u16,
    pub scale: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SharpenGainCurveDefaults {
    pub strength: u16,
    pub pre_limit: u16,
    pub function: [u16; 9],
    pub limit: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SharpenDefaults {
    pub filter0: SharpenFilterDefaults,
    pub filter1: SharpenFilterDefaults,
    pub filter2: SharpenFilterDefaults,
    pub filter3: SharpenFilterDefaults,
    pub filter4: SharpenFilterDefaults,
    pub positive: SharpenGainCurveDefaults,
    pub negative: SharpenGainCurveDefaults,
    /// Hex string, e.g. `"0x1f"`.
    pub enables: String,
    pub white: u16,
    pub black: u16,
    pub grey: u16,
    pub shfc_y_factor: u16,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColourMatrix {
    pub coeffs: [i32; 9],
    pub offsets: [i32; 3],
}

#[derive(Clone, Debug, Deserialize)]
pub struct ColourEncoding {
    pub ycbcr: ColourMatrix,
    pub ycbcr_inverse: ColourMatrix,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Defaults {
    pub debin: Debin,
    pub demosaic: DemosaicDefaults,
    pub false_colour: FalseColour,
    pub gamma: Gamma,
    pub resample: ResampleDefaults,
    pub sharpen: SharpenDefaults,
    pub colour_encoding: std::collections::BTreeMap<String, ColourEncoding>,
}

impl SharpenDefaults {
    /// Parses the hex-string `enables` field, e.g. `"0x1f"` or `"1f"`.
    pub fn enables_mask(&self) -> Result<u32> {
        let trimmed = self.enables.trim_start_matches("0x").trim_start_matches("0X");
        u32::from_str_radix(trimmed, 16).map_err(|e| Error::DefaultsAsset(e.to_string()))
    }
}

static DEFAULTS: OnceLock<Defaults> = OnceLock::new();

/// Loads and caches the defaults asset the first time it's needed. Every
/// subsequent call, from any thread, returns the same parsed value without
/// touching the filesystem again (`spec.md` §5: "lazily loaded... under a
/// process-wide mutex; read-only once loaded" — `OnceLock` gives us exactly
/// that without a separate explicit mutex).
pub fn defaults(path: &Path) -> Result<&'static Defaults> {
    if let Some(d) = DEFAULTS.get() {
        return Ok(d);
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::DefaultsAsset(e.to_string()))?;
    let parsed: Defaults = serde_json::from_str(&text).map_err(|e| Error::DefaultsAsset(e.to_string()))?;
    Ok(DEFAULTS.get_or_init(|| parsed))
}

/// Path compiled into the crate for callers who don't pass one explicitly
/// (`spec.md` §6: "path compiled-in or passed at construction").
pub fn default_asset_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/defaults.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpen_enables_parses_hex_with_prefix() {
        let sharpen = SharpenDefaults {
            filter0: SharpenFilterDefaults {
                kernel: [0; 9],
                offset: 0,
                threshold_slope: 0,
                scale: 0,
            },
            filter1: SharpenFilterDefaults {
                kernel: [0; 9],
                offset: 0,
                threshold_slope: 0,
                scale: 0,
            },
            filter2: SharpenFilterDefaults {
                kernel: [0; 9],
                offset: 0,
                threshold_slope: 0,
                scale: 0,
            },
            filter3: SharpenFilterDefaults {
                kernel: [0; 9],
                offset: 0,
                threshold_slope: 0,
                scale: 0,
            },
            filter4: SharpenFilterDefaults {
                kernel: [0; 9],
                offset: 0,
                threshold_slope: 0,
                scale: 0,
            },
            positive: SharpenGainCurveDefaults {
                strength: 0,
                pre_limit: 0,
                function: [0; 9],
                limit: 0,
            },
            negative: SharpenGainCurveDefaults {
                strength: 0,
                pre_limit: 0,
                function: [0; 9],
                limit: 0,
            },
            enables: "0x1f".to_string(),
            white: 0,
            black: 0,
            grey: 0,
            shfc_y_factor: 0,
        };
        assert_eq!(sharpen.enables_mask().unwrap(), 0x1f);
    }
}
