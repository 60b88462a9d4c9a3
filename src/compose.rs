//! Per-tile address-offset and phase composition (`spec.md` §4.5.4).
//!
//! Everything here is pure: given a tile's geometry (from
//! [`crate::tiling`]) and the already-finalised block configs, compute the
//! byte offsets and phase registers one [`crate::backend::Tile`] needs.
//! Kept apart from [`crate::backend`] because it has no business touching
//! `BackEnd`'s dirty bits or setters, only reading finalised state.

use crate::blocks::{Cac, Downscale, Lsc, OutputFormat, Resample};
use crate::error::{Error, Result};
use crate::format::ImageFormatConfig;
use crate::geometry::Length2;
use crate::stage::UNITY_SCALE;

pub const NUM_PHASES: i32 = 1 << 5;

/// `input_addr_offset` (+ the optional chroma `input_addr_offset2`) for a
/// tile's top-left input pixel.
pub fn input_addr_offset(image: &ImageFormatConfig, offset: Length2) -> Result<(u32, Option<u32>)> {
    image.compute_addr_offset(offset.x as u32, offset.y as u32)
}

/// Address offset for a TDN or stitch auxiliary buffer at a tile's input
/// position. TDN/stitch history buffers share the primary input's geometry,
/// so this is exactly `input_addr_offset` with the chroma plane discarded.
pub fn auxiliary_addr_offset(image: &ImageFormatConfig, offset: Length2) -> Result<u32> {
    let (addr, _) = image.compute_addr_offset(offset.x as u32, offset.y as u32)?;
    Ok(addr)
}

/// LSC/CAC grid offset: `(input_offset + block.offset) * grid_step`, shared
/// shape for both blocks (`spec.md` §4.5.4).
pub fn shading_grid_offset(grid_step: u32, input_offset: i32, block_offset: i32) -> i32 {
    (input_offset + block_offset) * grid_step as i32
}

pub fn lsc_grid_offset(lsc: &Lsc, grid_step_x: u32, grid_step_y: u32, input_offset: Length2) -> (i32, i32) {
    (
        shading_grid_offset(grid_step_x, input_offset.x, lsc.grid.offset_x as i32),
        shading_grid_offset(grid_step_y, input_offset.y, lsc.grid.offset_y as i32),
    )
}

pub fn cac_grid_offset(cac: &Cac, grid_step_x: u32, grid_step_y: u32, input_offset: Length2) -> (i32, i32) {
    (
        shading_grid_offset(grid_step_x, input_offset.x, cac.grid.offset_x as i32),
        shading_grid_offset(grid_step_y, input_offset.y, cac.grid.offset_y as i32),
    )
}

/// Output address offset for one branch's tile, applying the HFLIP/VFLIP
/// coordinate fix-ups from `spec.md` §4.4 ("Tie-breaks").
///
/// `hflip` mirrors `output_offset_x` in the *unflipped* coordinate frame:
/// `image_width - offset - width`. `vflip` uses the single-line addressing
/// quirk `image_height - offset - 1` rather than `- height`.
pub fn output_addr_offset(
    out_format: &ImageFormatConfig,
    unflipped_offset: Length2,
    output_size: Length2,
    hflip: bool,
    vflip: bool,
) -> Result<(u32, Option<u32>)> {
    let x = if hflip {
        out_format.width as i32 - unflipped_offset.x - output_size.x
    } else {
        unflipped_offset.x
    };
    let y = if vflip {
        out_format.height as i32 - unflipped_offset.y - 1
    } else {
        unflipped_offset.y
    };
    out_format.compute_addr_offset(x.max(0) as u32, y.max(0) as u32)
}

/// Per-plane downscale phase: `UnityPhase - ((resample_in_offset *
/// downscale.scale_factor) mod UnityScale)` (`spec.md` §4.5.4).
pub fn downscale_phase(resample_in_offset: i32, scale_factor_q12: i32) -> i32 {
    let unity_phase = UNITY_SCALE;
    let product = (resample_in_offset as i64 * scale_factor_q12 as i64).rem_euclid(UNITY_SCALE as i64);
    unity_phase - product as i32
}

/// Per-plane resample phase: `((output_offset * NumPhases *
/// scale_factor) / UnityScale) mod NumPhases`, plus the caller-supplied
/// per-plane initial phase, asserted within `[0, 2 * UnityPhase)`
/// (`spec.md` §4.5.4).
pub fn resample_phase(output_offset: i32, scale_factor_q12: i32, initial_phase: i32) -> Result<i32> {
    let raw = (output_offset as i64) * (NUM_PHASES as i64) * (scale_factor_q12 as i64) / (UNITY_SCALE as i64);
    let phase_steps = raw.rem_euclid(NUM_PHASES as i64) as i32;
    let scaled = phase_steps * (UNITY_SCALE / NUM_PHASES);
    let total = scaled + initial_phase;
    let bound = 2 * UNITY_SCALE;
    if total < 0 || total >= bound {
        return Err(Error::ResamplePhaseOutOfRange {
            phase: total as i64,
            bound: bound as i64,
        });
    }
    Ok(total)
}

/// Checks that every plane's resample phase for one branch agrees to
/// within half a pixel of output resolution, failing otherwise
/// (`spec.md` §4.5.4).
pub fn check_phase_agreement(branch: usize, phases: &[i32]) -> Result<()> {
    let (min, max) = phases
        .iter()
        .fold((i32::MAX, i32::MIN), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    if min == i32::MAX {
        return Ok(());
    }
    let diff_px = (max - min) as f64 / UNITY_SCALE as f64;
    if diff_px > 0.5 {
        return Err(Error::ResamplePhaseDisagreement { branch, diff_px });
    }
    Ok(())
}

/// Resample and downscale phases for every plane of one branch's tile.
pub struct BranchPhases {
    pub downscale: Option<[(i32, i32); 3]>,
    pub resample: Option<[(i32, i32); 3]>,
}

pub fn compose_branch_phases(
    downscale: Option<&Downscale>,
    resample: Option<&Resample>,
    resample_in_offset: Length2,
    output_offset: Length2,
    num_planes: usize,
    branch_index: usize,
) -> Result<BranchPhases> {
    let downscale_phases = downscale.map(|ds| {
        let x = downscale_phase(resample_in_offset.x, ds.scale_factor_x as i32);
        let y = downscale_phase(resample_in_offset.y, ds.scale_factor_y as i32);
        [(x, y); 3]
    });

    let resample_phases = match resample {
        Some(rs) => {
            let mut planes = [(0i32, 0i32); 3];
            let mut xs = Vec::with_capacity(num_planes);
            let mut ys = Vec::with_capacity(num_planes);
            for p in 0..num_planes.min(3) {
                let init_x = rs.initial_phase_x[p] as i32;
                let init_y = rs.initial_phase_y[p] as i32;
                let x = resample_phase(output_offset.x, rs.scale_factor_x as i32, init_x)?;
                let y = resample_phase(output_offset.y, rs.scale_factor_y as i32, init_y)?;
                planes[p] = (x, y);
                xs.push(x);
                ys.push(y);
            }
            check_phase_agreement(branch_index, &xs)?;
            check_phase_agreement(branch_index, &ys)?;
            Some(planes)
        }
        None => None,
    };

    Ok(BranchPhases {
        downscale: downscale_phases,
        resample: resample_phases,
    })
}

pub fn optimal_output_stride(format: &mut ImageFormatConfig, preserve_subsample_ratio: bool) {
    format.compute_stride_align(crate::format::PREFERRED_STRIDE_ALIGN, preserve_subsample_ratio);
}

/// `spec.md` §4.5.2: compressed output requires 8bpp and the compression
/// block to be enabled; clamps zero high-clip to 65535.
pub fn finalize_output_format(out: &mut OutputFormat, compression_block_enabled: bool) -> Result<()> {
    if out.high_clip == 0 {
        out.high_clip = 65535;
    }
    let descriptor = crate::format::FormatDescriptor(out.format);
    if descriptor.is_compressed() && !compression_block_enabled {
        return Err(Error::CompressedOutputRequiresCompressionBlock);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscale_phase_is_unity_when_offset_zero() {
        assert_eq!(downscale_phase(0, 4 * UNITY_SCALE), UNITY_SCALE);
    }

    #[test]
    fn resample_phase_zero_offset_is_initial_phase() {
        let phase = resample_phase(0, UNITY_SCALE, 7).unwrap();
        assert_eq!(phase, 7);
    }

    #[test]
    fn phase_agreement_within_half_pixel_passes() {
        check_phase_agreement(0, &[0, UNITY_SCALE / 4]).unwrap();
    }

    #[test]
    fn phase_agreement_beyond_half_pixel_fails() {
        let err = check_phase_agreement(0, &[0, UNITY_SCALE]).unwrap_err();
        assert!(matches!(err, Error::ResamplePhaseDisagreement { .. }));
    }
}
