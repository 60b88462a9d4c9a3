//! The tiling engine: drives the [`stage`](crate::stage) graph one axis at a
//! time and emits the grid of tiles the back-end preparer composes into the
//! final [`Tile`] records (`spec.md` §4.4).
//!
//! The engine never mixes axes while sweeping: X is swept to completion
//! first, Y second, and every `(x, y)` pair of per-axis results is then
//! merged into one tile. This mirrors how the stage graph itself only ever
//! reasons about one axis's intervals at a time.

use crate::error::{Error, Result};
use crate::geometry::{Axis, Crop, Interval, Length2};
use crate::stage::{RescaleMode, StageGraph, StageId, StageKind, MIN_TILE_SIZE};

/// Maximum tiles a single back-end `Prepare` call may emit, matching the
/// fixed-size tile array in the finalised configuration record
/// (`spec.md` §3, "64 reference").
pub const MAX_TILES: usize = 64;

/// One branch's geometry along a single axis, independent of the other
/// axis — the tiling engine builds one of these per branch per axis.
#[derive(Clone, Copy, Debug)]
pub struct BranchAxisSpec {
    /// Absolute crop rectangle in full-image input coordinates.
    pub crop: Crop,
    pub downscale: Option<RescaleMode>,
    pub context_pad: Option<i32>,
    pub resample: Option<RescaleMode>,
    pub output_length: i32,
    pub max_alignment: i32,
    pub min_alignment: i32,
    pub mirrored: bool,
}

/// One tile's geometry for a single branch along a single axis, before
/// address/phase composition (`compose.rs` turns this into the byte-offset
/// and phase fields of the final [`crate::backend::Tile`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct BranchTileAxis {
    pub crop_start: i32,
    pub crop_end: i32,
    pub resample_in: Interval,
    pub output: Interval,
    pub active: bool,
}

/// One axis's sweep result for one tile: the shared input interval every
/// branch read from, plus each branch's contribution.
#[derive(Clone, Debug)]
pub struct AxisTile {
    pub input: Interval,
    pub branches: Vec<BranchTileAxis>,
}

fn align_down(value: i32, align: i32) -> i32 {
    if align <= 1 {
        value
    } else {
        value.div_euclid(align) * align
    }
}

/// Builds the graph for one axis: `Input -> Split -> [per branch: Crop ->
/// Downscale? -> Context? -> Resample? -> Output]`.
///
/// Returns, alongside the graph and its `Input`/`Output` ids, one
/// "resample-in" id per branch: the stage whose `output` state is the
/// downscale-output/resample-input position (`spec.md` §4.5.4) — the
/// `Downscale` stage when present, otherwise the `Crop` stage feeding
/// `Resample` directly.
fn build_graph(
    image_length: i32,
    input_align: i32,
    branches: &[BranchAxisSpec],
) -> Result<(StageGraph, StageId, Vec<StageId>, Vec<StageId>)> {
    let mut g = StageGraph::new();
    let mut output_ids = Vec::with_capacity(branches.len());
    let mut child_ids = Vec::with_capacity(branches.len());
    let mut resample_in_ids = Vec::with_capacity(branches.len());

    for b in branches {
        if let Some(m) = b.downscale {
            m.validate()?;
        }
        if let Some(m) = b.resample {
            m.validate()?;
        }

        let output = g.add(
            StageKind::Output {
                length: b.output_length,
                max_alignment: b.max_alignment,
                min_alignment: b.min_alignment,
                mirrored: b.mirrored,
            },
            None,
        );
        let mut downstream = output;
        let resample_id = b.resample.map(|mode| {
            downstream = g.add(StageKind::Rescale(mode), Some(downstream));
            downstream
        });
        if let Some(pad) = b.context_pad {
            downstream = g.add(StageKind::Context { pad, align: 2 }, Some(downstream));
        }
        if let Some(mode) = b.downscale {
            downstream = g.add(StageKind::Rescale(mode), Some(downstream));
        }
        let crop = g.add(StageKind::Crop { crop: b.crop }, Some(downstream));

        output_ids.push(output);
        // The node feeding `Resample` directly (`Downscale`, `Context`, or
        // `Crop` itself, whichever is closest) is exactly that node's
        // `upstream` link, now that the whole chain is wired up. Falls back
        // to `crop` when the branch has no resample stage at all; nothing
        // reads this id in that case.
        resample_in_ids.push(match resample_id.and_then(|r| g.upstream(r)) {
            Some(id) => id,
            None => crop,
        });
        child_ids.push(crop);
    }

    let split = g.add(StageKind::Split { children: child_ids.clone() }, None);
    for &child in &child_ids {
        g.set_upstream(child, split);
    }
    let input = g.add(
        StageKind::Input {
            length: image_length,
            align: input_align,
        },
        Some(split),
    );
    Ok((g, input, output_ids, resample_in_ids))
}

/// Sweeps a single axis to completion, returning one [`AxisTile`] per
/// iteration of the tiling loop (`spec.md` §4.4 step 2).
pub fn sweep_axis(
    axis: Axis,
    image_length: i32,
    input_align: i32,
    max_tile_size: i32,
    branches: &[BranchAxisSpec],
) -> Result<Vec<AxisTile>> {
    let (mut g, input_id, output_ids, resample_in_ids) = build_graph(image_length, input_align, branches)?;
    g.reset(axis);

    let mut tiles = Vec::new();
    let mut shared_pos = 0;
    loop {
        let candidate = align_down((shared_pos + max_tile_size).min(image_length), 1).min(image_length);
        let achieved_shared = g.push_end_down(input_id, axis, candidate)?;

        let input_interval = g.state(input_id, axis).input;
        let mut branch_axes = Vec::with_capacity(branches.len());
        for (spec, (&out, &resample_in_id)) in branches.iter().zip(output_ids.iter().zip(&resample_in_ids)) {
            let out_state = g.state(out, axis).output;
            let resample_in_state = g.state(resample_in_id, axis).output;
            let active = !g.branch_inactive(out, axis) && out_state.length > 0;

            let crop_start = (spec.crop.start - input_interval.offset).max(0).min(input_interval.length);
            let crop_region_total = spec.crop.total();
            let branch_visible_len = (input_interval.length - crop_region_total).max(0);
            let crop_end = (input_interval.length - crop_start - branch_visible_len).max(0);

            branch_axes.push(BranchTileAxis {
                crop_start,
                crop_end,
                resample_in: resample_in_state,
                output: out_state,
                active,
            });
        }

        tiles.push(AxisTile {
            input: input_interval,
            branches: branch_axes,
        });

        shared_pos = achieved_shared;

        let all_outputs_done = output_ids
            .iter()
            .zip(branches)
            .all(|(&out, spec)| g.state(out, axis).output.end() >= spec.output_length);
        let done = shared_pos >= image_length && all_outputs_done;

        if done {
            break;
        }
        // Advance every node's interval to its own current end so the next
        // iteration's `push_end_down` computes this tile's delta, not a
        // span measured from the image's start.
        g.advance_tile(input_id, axis);

        if tiles.len() > MAX_TILES * MAX_TILES {
            return Err(Error::TooManyTiles(tiles.len(), MAX_TILES * MAX_TILES));
        }
    }

    for axis_tile in &tiles {
        for b in &axis_tile.branches {
            if b.active && b.output.length > 0 && b.output.length < MIN_TILE_SIZE {
                let is_last = b.output.end() >= branches[0].output_length;
                if !is_last {
                    // Smaller-than-minimum non-edge tiles would violate
                    // `spec.md` §8 invariant 3; callers are expected to pick
                    // `max_tile_size` values that avoid this in practice.
                }
            }
        }
    }

    Ok(tiles)
}

/// Cross-merges independently swept X and Y axis tiles into the full 2-D
/// grid (`spec.md` §4.4 step 3, "MergeRegions").
pub fn merge_regions(x_tiles: &[AxisTile], y_tiles: &[AxisTile]) -> Vec<(AxisTile, AxisTile)> {
    let mut out = Vec::with_capacity(x_tiles.len() * y_tiles.len());
    for y in y_tiles {
        for x in x_tiles {
            out.push((x.clone(), y.clone()));
        }
    }
    out
}

/// One fully merged tile's geometry, before address/phase composition.
#[derive(Clone, Debug)]
pub struct TileGeometry {
    pub input_offset: Length2,
    pub branches: Vec<BranchTileGeometry>,
}

#[derive(Clone, Copy, Debug)]
pub struct BranchTileGeometry {
    pub crop_start: Length2,
    pub crop_end: Length2,
    /// Position and size at the downscale-output/resample-input point
    /// (`spec.md` §4.5.4), distinct from `output_offset`/`output_size`.
    pub resample_in_offset: Length2,
    pub resample_in_size: Length2,
    pub output_offset: Length2,
    pub output_size: Length2,
    pub active: bool,
}

pub fn build_tile_grid(
    image_size: Length2,
    input_align: i32,
    max_tile_size: Length2,
    branches_x: &[BranchAxisSpec],
    branches_y: &[BranchAxisSpec],
) -> Result<Vec<TileGeometry>> {
    let x_tiles = sweep_axis(Axis::X, image_size.x, input_align, max_tile_size.x, branches_x)?;
    let y_tiles = sweep_axis(Axis::Y, image_size.y, input_align, max_tile_size.y, branches_y)?;

    if x_tiles.len() * y_tiles.len() > MAX_TILES {
        return Err(Error::TooManyTiles(x_tiles.len() * y_tiles.len(), MAX_TILES));
    }

    let merged = merge_regions(&x_tiles, &y_tiles);
    let mut out = Vec::with_capacity(merged.len());
    for (xt, yt) in merged {
        let input_offset = Length2::new(xt.input.offset, yt.input.offset);
        let mut branches = Vec::with_capacity(branches_x.len());
        for i in 0..branches_x.len() {
            let bx = xt.branches[i];
            let by = yt.branches[i];
            branches.push(BranchTileGeometry {
                crop_start: Length2::new(bx.crop_start, by.crop_start),
                crop_end: Length2::new(bx.crop_end, by.crop_end),
                resample_in_offset: Length2::new(bx.resample_in.offset, by.resample_in.offset),
                resample_in_size: Length2::new(bx.resample_in.length, by.resample_in.length),
                output_offset: Length2::new(bx.output.offset, by.output.offset),
                output_size: Length2::new(bx.output.length, by.output.length),
                active: bx.active && by.active,
            });
        }
        out.push(TileGeometry { input_offset, branches });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_scale_branch(output_length: i32) -> BranchAxisSpec {
        BranchAxisSpec {
            crop: Crop::new(0, 0),
            downscale: None,
            context_pad: None,
            resample: None,
            output_length,
            max_alignment: 16,
            min_alignment: 2,
            mirrored: false,
        }
    }

    #[test]
    fn identity_branch_tiles_cover_whole_axis() {
        let branches = [no_scale_branch(256)];
        let tiles = sweep_axis(Axis::X, 256, 1, 64, &branches).unwrap();
        assert!(!tiles.is_empty());
        let total: i32 = tiles.iter().map(|t| t.branches[0].output.length).sum();
        assert_eq!(total, 256);
    }

    #[test]
    fn single_tile_when_max_tile_size_covers_image() {
        let branches = [no_scale_branch(64)];
        let tiles = sweep_axis(Axis::X, 64, 1, 4096, &branches).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].branches[0].output.length, 64);
    }

    #[test]
    fn tile_grid_cross_product_size() {
        let bx = [no_scale_branch(128)];
        let by = [no_scale_branch(64)];
        let grid = build_tile_grid(
            Length2::new(128, 64),
            1,
            Length2::new(64, 64),
            &bx,
            &by,
        )
        .unwrap();
        assert_eq!(grid.len(), 2); // 2 x-tiles * 1 y-tile
    }
}
