//! Per-block hardware configuration records.
//!
//! Every struct here is `#[repr(C)]` plain data: these are the byte-for-byte
//! layouts the ISP hardware and the shared-memory `BackEnd` record agree on,
//! so field order, width and padding are all part of the external ABI
//! (`spec.md` §3). Each layout is pinned down with a compile-time size
//! assertion the same way `nouveau/nil/su_info.rs` pins `SuInfo`'s size with
//! a `static_assert!`-style check next to the struct it describes.
//!
//! The number of parallel output branches is fixed at compile time; bumping
//! it only requires widening the `[T; MAX_BRANCHES]` arrays below and the
//! matching arrays in [`crate::backend::BackEnd`] — and, since
//! [`crate::backend::Tile`] is a fixed-size ABI record, re-deriving its
//! reserved padding to keep the total at 160 bytes.
use crate::error::{Error, Result};
use crate::stage::UNITY_SCALE;

pub const MAX_BRANCHES: usize = 2;

macro_rules! assert_size_of {
    ($ty:ty, $size:expr) => {
        const _: () = assert!(std::mem::size_of::<$ty>() == $size, "ABI size mismatch");
    };
}

/// Debinning coefficients applied right after sensor read-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Debin {
    pub coefs: [i16; 4],
    pub _pad: [u8; 8],
}
assert_size_of!(Debin, 16);

/// Decompanding (piecewise-linear inverse companding curve index).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Decompand {
    pub lut_index: u32,
    pub _pad: [u8; 4],
}
assert_size_of!(Decompand, 8);

/// Defective pixel correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Dpc {
    pub strength: u16,
    pub threshold: u16,
}
assert_size_of!(Dpc, 4);

/// Green-equalisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Geq {
    pub strength: u16,
    pub slope: u16,
}
assert_size_of!(Geq, 4);

/// Temporal denoise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Tdn {
    pub threshold: u16,
    pub reset: u8,
    pub _pad: u8,
    pub motion_threshold_recip: u16,
    pub _pad2: u16,
}
assert_size_of!(Tdn, 8);

impl Tdn {
    /// `spec.md` §9 Open Question 1: the reciprocal rounds *up* when
    /// `threshold > 0` (one unit of bias versus the naive reciprocal),
    /// matching the reference firmware's constant rather than the
    /// mathematically cleaner round-to-nearest.
    pub fn finalize_motion_threshold_recip(&mut self, threshold: u16) {
        self.motion_threshold_recip = if threshold == 0 {
            0
        } else {
            (((256u32 + threshold as u32 - 1) / threshold as u32).min(u16::MAX as u32)) as u16
        };
    }
}

/// Spatial denoise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Sdn {
    pub strength: u16,
    pub threshold: u16,
}
assert_size_of!(Sdn, 4);

/// Black level correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Blc {
    pub black_level: [u16; 4],
}
assert_size_of!(Blc, 8);

/// Multi-exposure stitching.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Stitch {
    pub threshold_lo: u16,
    pub threshold_hi: u16,
    pub motion_threshold_recip: u16,
    pub _pad: u16,
}
assert_size_of!(Stitch, 8);

impl Stitch {
    pub fn finalize_motion_threshold_recip(&mut self, threshold: u16) {
        self.motion_threshold_recip = if threshold == 0 {
            0
        } else {
            (((256u32 + threshold as u32 - 1) / threshold as u32).min(u16::MAX as u32)) as u16
        };
    }
}

/// White balance gains.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Wbg {
    pub gain_r: u16,
    pub gain_b: u16,
}
assert_size_of!(Wbg, 4);

/// Colour denoise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Cdn {
    pub threshold: u16,
    pub strength: u16,
}
assert_size_of!(Cdn, 4);

/// Lens shading / chromatic aberration correction grid, shared layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ShadingGrid {
    pub grid_size: u16,
    pub step_precision: u8,
    pub _pad: u8,
    pub offset_x: i16,
    pub offset_y: i16,
    pub centre_x: u16,
    pub centre_y: u16,
}
assert_size_of!(ShadingGrid, 12);

impl ShadingGrid {
    /// `grid_step = (grid_size << step_precision) / image_dim`, asserted
    /// against `grid_step * (dim + offset - 1) < grid_size << step_precision`
    /// (`spec.md` §4.5.2).
    pub fn compute_grid_step(&self, image_dim: u32, offset: i32, what: &'static str) -> Result<u32> {
        let numerator = (self.grid_size as u64) << self.step_precision;
        let step = (numerator / image_dim.max(1) as u64) as u32;
        let lhs = step as u64 * (image_dim as i64 + offset as i64 - 1).max(0) as u64;
        if lhs >= numerator {
            return Err(Error::GridStepOverflow {
                what,
                step,
                lhs,
                rhs: numerator,
            });
        }
        Ok(step)
    }
}

/// Lens shading correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Lsc {
    pub grid: ShadingGrid,
}
assert_size_of!(Lsc, 12);

/// Chromatic aberration correction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Cac {
    pub grid: ShadingGrid,
}
assert_size_of!(Cac, 12);

/// Global tonemap curve selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Tonemap {
    pub lut_index: u16,
    pub strength: u16,
}
assert_size_of!(Tonemap, 4);

/// Demosaic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Demosaic {
    pub sharper: u8,
    pub fc_mode: u8,
    pub _pad: u16,
}
assert_size_of!(Demosaic, 4);

/// Colour correction matrix, row-major 3x3 fixed-point Q12.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Ccm {
    pub matrix: [i32; 9],
    pub offsets: [i32; 3],
}
assert_size_of!(Ccm, 48);

impl Default for Ccm {
    fn default() -> Self {
        let mut matrix = [0i32; 9];
        matrix[0] = UNITY_SCALE;
        matrix[4] = UNITY_SCALE;
        matrix[8] = UNITY_SCALE;
        Self {
            matrix,
            offsets: [0; 3],
        }
    }
}

/// RGB-to-YCbCr matrix (or its inverse), same layout as [`Ccm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Ycbcr {
    pub coeffs: [i32; 9],
    pub offsets: [i32; 3],
}
assert_size_of!(Ycbcr, 48);

impl Default for Ycbcr {
    fn default() -> Self {
        let mut coeffs = [0i32; 9];
        coeffs[0] = UNITY_SCALE;
        coeffs[4] = UNITY_SCALE;
        coeffs[8] = UNITY_SCALE;
        Self {
            coeffs,
            offsets: [0; 3],
        }
    }
}

/// One of the five polyphase sharpen sub-filters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SharpenFilter {
    pub kernel: [i16; 9],
    pub offset: i16,
    pub threshold_slope: u16,
    pub scale: u16,
    pub _pad: u16,
}
assert_size_of!(SharpenFilter, 26);

/// Sharpen gain-limiting curve, shared by the positive and negative sides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SharpenGainCurve {
    pub strength: u16,
    pub pre_limit: u16,
    pub function: [u16; 9],
    pub limit: u16,
    pub _pad: u16,
}
assert_size_of!(SharpenGainCurve, 26);

/// Edge/texture sharpening.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Sharpen {
    pub filters: [SharpenFilter; 5],
    pub positive: SharpenGainCurve,
    pub negative: SharpenGainCurve,
    pub enables: u32,
    pub white: u16,
    pub black: u16,
    pub grey: u16,
    pub shfc_y_factor: u16,
}
assert_size_of!(Sharpen, 5 * 26 + 26 + 26 + 4 + 8);

/// Output gamma curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Gamma {
    pub lut_index: u16,
    pub _pad: u16,
}
assert_size_of!(Gamma, 4);

/// Integer-ratio area downscale, one per output branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Downscale {
    pub scaled_width: u16,
    pub scaled_height: u16,
    pub scale_factor_x: u16,
    pub scale_factor_y: u16,
    pub scale_recip_x: u16,
    pub scale_recip_y: u16,
}
assert_size_of!(Downscale, 12);

impl Downscale {
    /// `spec.md` §4.5.2: forward and reciprocal scale factors, Q12,
    /// restricted to `{unity} ∪ [2, 8]`, one call per axis.
    pub fn finalize_axis(input_len: u32, scaled: u32) -> Result<(u16, u16)> {
        if scaled == 0 || input_len == 0 {
            return Ok((UNITY_SCALE as u16, UNITY_SCALE as u16));
        }
        let ratio = input_len as f64 / scaled as f64;
        let rounded = ratio.round() as i64;
        if !(rounded == 1 || (2..=8).contains(&rounded)) || (ratio - rounded as f64).abs() > 1e-6 {
            return Err(Error::InvalidDownscaleFactor(rounded.max(0) as u32));
        }
        let factor_q12 = (rounded * UNITY_SCALE as i64) as u16;
        let recip_q12 = (UNITY_SCALE as i64 / rounded) as u16;
        Ok((factor_q12, recip_q12))
    }
}

/// Six-tap polyphase fractional resample, one per output branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Resample {
    pub scaled_width: u16,
    pub scaled_height: u16,
    pub scale_factor_x: u16,
    pub scale_factor_y: u16,
    pub initial_phase_x: [i16; 3],
    pub initial_phase_y: [i16; 3],
    pub filter_name_index: u16,
    pub _pad: u16,
}
assert_size_of!(Resample, 2 + 2 + 2 + 2 + 6 + 6 + 2 + 2);

impl Resample {
    /// `((dim - 1) << 12) / (scaled - 1)`, restricted to `[1/16, 16)`
    /// (`spec.md` §4.5.2).
    pub fn compute_scale_factor(dim: u32, scaled: u32) -> Result<u16> {
        if scaled <= 1 || dim <= 1 {
            return Ok(UNITY_SCALE as u16);
        }
        let factor = ((dim as i64 - 1) << 12) / (scaled as i64 - 1);
        let scale = factor as f64 / UNITY_SCALE as f64;
        if !(1.0 / 16.0..16.0).contains(&scale) {
            return Err(Error::ScaleFactorOutOfRange {
                what: "resample",
                scale,
                min: 1.0 / 16.0,
                max: 16.0,
            });
        }
        Ok(factor as u16)
    }
}

/// One output branch's pixel format and addressing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct OutputFormat {
    pub width: u16,
    pub height: u16,
    pub format: u32,
    pub stride: u32,
    pub stride2: u32,
    pub high_clip: u16,
    pub low_clip: u16,
    pub hflip: u8,
    pub vflip: u8,
    pub _pad: u16,
}
assert_size_of!(OutputFormat, 2 + 2 + 4 + 4 + 4 + 2 + 2 + 1 + 1 + 2);

/// Histogram-of-gradients statistics tap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Hog {
    pub cell_width: u16,
    pub cell_height: u16,
    pub addr_offset: u32,
}
assert_size_of!(Hog, 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tdn_motion_threshold_recip_rounds_up() {
        let mut tdn = Tdn::default();
        tdn.finalize_motion_threshold_recip(10);
        // (256 + 10 - 1) / 10 = 26, not the naive 256/10 = 25.
        assert_eq!(tdn.motion_threshold_recip, 26);
    }

    #[test]
    fn tdn_motion_threshold_recip_zero_when_no_threshold() {
        let mut tdn = Tdn::default();
        tdn.finalize_motion_threshold_recip(0);
        assert_eq!(tdn.motion_threshold_recip, 0);
    }

    #[test]
    fn downscale_rejects_non_power_factor() {
        let err = Downscale::finalize_axis(100, 33).unwrap_err();
        assert!(matches!(err, Error::InvalidDownscaleFactor(_)));
    }

    #[test]
    fn downscale_accepts_exact_4x() {
        let (factor, recip) = Downscale::finalize_axis(4096, 1024).unwrap();
        assert_eq!(factor, (UNITY_SCALE * 4) as u16);
        assert_eq!(recip, (UNITY_SCALE / 4) as u16);
    }

    #[test]
    fn resample_scale_factor_rejects_out_of_range() {
        let err = Resample::compute_scale_factor(4096, 100).unwrap_err();
        assert!(matches!(err, Error::ScaleFactorOutOfRange { .. }));
    }

    #[test]
    fn shading_grid_step_detects_overflow() {
        let grid = ShadingGrid {
            grid_size: 2,
            step_precision: 0,
            offset_x: 0,
            offset_y: 0,
            centre_x: 0,
            centre_y: 0,
            _pad: 0,
        };
        let err = grid.compute_grid_step(1, 0, "lsc").unwrap_err();
        assert!(matches!(err, Error::GridStepOverflow { .. }));
    }
}
