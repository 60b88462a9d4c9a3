//! The stage graph: a tagged-variant pipeline of processing stages, each
//! tracking its input/output/crop intervals along one axis at a time
//! (`spec.md` §4.3).
//!
//! Nodes live in an arena (`StageGraph`) and refer to each other by
//! [`StageId`] rather than by pointer or `Rc`, following this codebase's
//! convention for graph-shaped IR (`compiler/rust/cfg.rs`,
//! `nouveau/compiler/nak` use the same arena-of-indices shape for their
//! control-flow graphs). Mutating a node while recursing into its neighbour
//! is then just "look the neighbour up by index", with no aliasing to fight.
//!
//! Two passes drive one axis of a tiling sweep, once per tile:
//! - [`StageGraph::push_end_down`] flows from `Input` toward `Output`,
//!   mapping an input-side end to the end each stage can actually produce.
//! - [`StageGraph::advance_tile`] then flows the same direction, `Input`
//!   toward `Output`, snapping every node's start to the end it just
//!   produced, so the *next* `push_end_down` call computes that node's
//!   next per-tile delta instead of a span measured from the image's start
//!   (`spec.md` §4.4 step 2e, "each output advances its start to its
//!   previous end").
//!
//! `Split`'s reconciliation is the one place this implementation makes an
//! explicit simplifying choice over the terse wording in `spec.md` §4.3;
//! see `DESIGN.md` ("Split reconciliation") for the reasoning.

use crate::error::{Error, Result};
use crate::geometry::{Axis, Crop, Interval, Interval2};

pub const UNITY_SCALE: i32 = 1 << 12;
pub const MIN_TILE_SIZE: i32 = 16;

/// Intrinsic context pixels a six-tap polyphase resample filter needs beyond
/// its nominal output region, folded into `Rescale` itself rather than
/// requiring a caller-visible `Context` stage for this one purpose (the
/// explicit `Context` stage exists for *other* neighbourhood-dependent
/// blocks: sharpen, demosaic, stitch).
pub const RESAMPLE_TAP_CONTEXT: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RescaleMode {
    /// Integer-ratio area reduction, 1x or 2..=8x.
    Downscale { scale_factor_q12: i32 },
    /// Six-tap polyphase fractional scaling.
    Resample { scale_factor_q12: i32 },
}

impl RescaleMode {
    pub fn scale_factor_q12(&self) -> i32 {
        match self {
            RescaleMode::Downscale { scale_factor_q12 } | RescaleMode::Resample { scale_factor_q12 } => {
                *scale_factor_q12
            }
        }
    }

    fn tap_context(&self) -> i32 {
        match self {
            RescaleMode::Downscale { .. } => 0,
            RescaleMode::Resample { .. } => RESAMPLE_TAP_CONTEXT,
        }
    }

    /// `spec.md` §4.3: resample must be in `[1/16, 16)`; downscale in
    /// `{1} ∪ [2, 8]`.
    pub fn validate(&self) -> Result<()> {
        let scale = self.scale_factor_q12() as f64 / UNITY_SCALE as f64;
        match self {
            RescaleMode::Resample { .. } => {
                if !(1.0 / 16.0..16.0).contains(&scale) {
                    return Err(Error::ScaleFactorOutOfRange {
                        what: "resample",
                        scale,
                        min: 1.0 / 16.0,
                        max: 16.0,
                    });
                }
            }
            RescaleMode::Downscale { .. } => {
                let rounded = scale.round() as i64;
                if !(rounded == 1 || (2..=8).contains(&rounded)) || (scale - rounded as f64).abs() > 1e-6
                {
                    return Err(Error::InvalidDownscaleFactor(rounded.max(0) as u32));
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StageKind {
    /// Terminal upstream: the full input image along this axis.
    Input { length: i32, align: i32 },
    Rescale(RescaleMode),
    /// An absolute crop rectangle in this branch's input coordinates.
    Crop { crop: Crop },
    /// Symmetric padding for neighbourhood-dependent filters.
    Context { pad: i32, align: i32 },
    /// Terminal downstream with multiple children (the branches).
    Split { children: Vec<StageId> },
    /// Terminal downstream for one branch.
    Output {
        length: i32,
        max_alignment: i32,
        min_alignment: i32,
        mirrored: bool,
    },
}

/// One node's accumulated per-axis state across a tiling sweep.
#[derive(Clone, Copy, Debug, Default)]
pub struct AxisState {
    pub input: Interval,
    pub output: Interval,
    /// Whether this stage (and everything downstream of it) produced no
    /// output for the tile currently being emitted.
    pub inactive: bool,
}

#[derive(Clone, Debug)]
pub struct Node {
    pub kind: StageKind,
    pub downstream: Option<StageId>,
    /// The node immediately toward `Input` from this one. Derived
    /// automatically from `downstream` by [`StageGraph::add`] for every
    /// node except a `Split`'s children, whose upstream is the `Split`
    /// itself and is wired up explicitly once the `Split` node exists
    /// (`tiling.rs::build_graph`).
    pub upstream: Option<StageId>,
    pub state: [AxisState; 2],
}

impl Node {
    fn state(&self, axis: Axis) -> &AxisState {
        &self.state[axis as usize]
    }
    fn state_mut(&mut self, axis: Axis) -> &mut AxisState {
        &mut self.state[axis as usize]
    }
}

/// The arena. Constructed fresh for every `Prepare` call that needs a
/// retile, mutated during the sweep, discarded at the end
/// (`spec.md` §3, "Lifetime").
#[derive(Clone, Debug, Default)]
pub struct StageGraph {
    nodes: Vec<Node>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn add(&mut self, kind: StageKind, downstream: Option<StageId>) -> StageId {
        let id = StageId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            downstream,
            upstream: None,
            state: [AxisState::default(); 2],
        });
        if let Some(next) = downstream {
            self.nodes[next.0].upstream = Some(id);
        }
        id
    }

    /// Wires up the one upstream link [`StageGraph::add`] can't infer: a
    /// `Split`'s children point toward `Output` via their own `downstream`
    /// chain, not toward the `Split` node that produced them (which doesn't
    /// exist yet when they're added). Call once per child right after
    /// adding the `Split` node.
    pub fn set_upstream(&mut self, id: StageId, upstream: StageId) {
        self.nodes[id.0].upstream = Some(upstream);
    }

    pub fn kind(&self, id: StageId) -> &StageKind {
        &self.nodes[id.0].kind
    }

    pub fn upstream(&self, id: StageId) -> Option<StageId> {
        self.nodes[id.0].upstream
    }

    pub fn state(&self, id: StageId, axis: Axis) -> AxisState {
        *self.nodes[id.0].state(axis)
    }

    pub fn reset(&mut self, axis: Axis) {
        for node in &mut self.nodes {
            *node.state_mut(axis) = AxisState::default();
        }
    }

    fn align_down(value: i32, align: i32) -> i32 {
        if align <= 1 {
            value
        } else {
            (value.div_euclid(align)) * align
        }
    }

    /// Full output length a given terminal `Output` node must eventually
    /// cover, used so the last tile of a branch is exempt from alignment
    /// (`spec.md` §4.4 "the rightmost/bottommost tile... is exempt").
    fn output_length(&self, id: StageId) -> i32 {
        match &self.nodes[id.0].kind {
            StageKind::Output { length, .. } => *length,
            _ => unreachable!("output_length called on non-Output node"),
        }
    }

    /// Maps an input-side end forward to what each downstream stage can
    /// produce, terminating at the branch's `Output` node(s).
    ///
    /// Returns the end each reached `Output` could align to. For a `Split`,
    /// this is the minimum across branches that made progress, restoring
    /// lockstep as required by `spec.md` §4.3's `Split` bullet; see
    /// `DESIGN.md` for why this implementation broadcasts the same
    /// shared-axis candidate to every child rather than querying per-branch
    /// maxima first.
    pub fn push_end_down(&mut self, id: StageId, axis: Axis, in_end: i32) -> Result<i32> {
        let kind = self.nodes[id.0].kind.clone();
        match kind {
            StageKind::Input { length, .. } => {
                let clamped = in_end.min(length).max(0);
                self.nodes[id.0].state_mut(axis).input.set_end(clamped);
                let downstream = self.nodes[id.0].downstream;
                match downstream {
                    Some(next) => self.push_end_down(next, axis, clamped),
                    None => Ok(clamped),
                }
            }
            StageKind::Crop { crop } => {
                let region_end = crop.start + (self.crop_region_length(id, axis));
                let clamped_in = in_end.min(region_end);
                let out_end = (clamped_in - crop.start).max(0);
                self.nodes[id.0].state_mut(axis).output.set_end(out_end);
                let min_progress = self.nodes[id.0].state(axis).output.offset + 1;
                if out_end < min_progress.min(MIN_TILE_SIZE) && out_end < self.crop_region_length(id, axis) {
                    // Not enough pixels yet for even a minimal tile; ask
                    // upstream (via the caller) for more before re-trying.
                    self.nodes[id.0].state_mut(axis).inactive = true;
                    return Ok(0);
                }
                self.nodes[id.0].state_mut(axis).inactive = false;
                let downstream = self.nodes[id.0].downstream;
                match downstream {
                    Some(next) => self.push_end_down(next, axis, out_end),
                    None => Ok(out_end),
                }
            }
            StageKind::Rescale(mode) => {
                let scale = mode.scale_factor_q12() as i64;
                let out_end = ((in_end as i64) * UNITY_SCALE as i64 / scale) as i32;
                self.nodes[id.0].state_mut(axis).output.set_end(out_end);
                let downstream = self.nodes[id.0].downstream;
                match downstream {
                    Some(next) => self.push_end_down(next, axis, out_end),
                    None => Ok(out_end),
                }
            }
            StageKind::Context { pad, .. } => {
                let out_end = (in_end - pad).max(0);
                self.nodes[id.0].state_mut(axis).output.set_end(out_end);
                let downstream = self.nodes[id.0].downstream;
                match downstream {
                    Some(next) => self.push_end_down(next, axis, out_end),
                    None => Ok(out_end),
                }
            }
            StageKind::Output {
                length,
                max_alignment,
                min_alignment,
                ..
            } => {
                let current_start = self.nodes[id.0].state(axis).output.offset;
                let achieved = if in_end >= length {
                    length
                } else {
                    let try_max = Self::align_down(in_end, max_alignment);
                    if try_max > current_start {
                        try_max
                    } else {
                        let try_min = Self::align_down(in_end, min_alignment);
                        if try_min > current_start {
                            try_min
                        } else {
                            current_start
                        }
                    }
                };
                let made_progress = achieved > current_start;
                self.nodes[id.0].state_mut(axis).inactive = !made_progress;
                self.nodes[id.0].state_mut(axis).output.set_end(achieved);
                Ok(achieved)
            }
            StageKind::Split { children } => {
                let mut any_progress = false;
                for child in &children {
                    self.push_end_down(*child, axis, in_end)?;
                    if !self.branch_inactive(*child, axis) {
                        any_progress = true;
                    }
                }
                self.nodes[id.0].state_mut(axis).output.set_end(in_end);
                if !any_progress {
                    return Err(Error::TilingStalled { branch: 0, axis });
                }
                Ok(in_end)
            }
        }
    }

    /// True if the subtree rooted at `id` produced no output for the tile
    /// currently being built, along `axis`.
    pub fn branch_inactive(&self, id: StageId, axis: Axis) -> bool {
        match &self.nodes[id.0].kind {
            StageKind::Output { .. } => self.nodes[id.0].state(axis).inactive,
            _ => self.nodes[id.0]
                .downstream
                .map(|d| self.branch_inactive(d, axis))
                .unwrap_or(self.nodes[id.0].state(axis).inactive),
        }
    }

    /// The visible length left in this branch after cropping: the full
    /// image length (read off the `Input` node reached by walking
    /// `upstream`) minus the crop's own `start + end`.
    fn crop_region_length(&self, id: StageId, axis: Axis) -> i32 {
        match &self.nodes[id.0].kind {
            StageKind::Crop { crop } => (self.image_length(id, axis) - crop.total()).max(0),
            _ => i32::MAX / 2,
        }
    }

    /// Walks `upstream` from any node until it reaches `Input`, returning
    /// that axis's fixed image length.
    fn image_length(&self, id: StageId, axis: Axis) -> i32 {
        let _ = axis;
        let mut cur = id;
        loop {
            match &self.nodes[cur.0].kind {
                StageKind::Input { length, .. } => return *length,
                _ => match self.nodes[cur.0].upstream {
                    Some(up) => cur = up,
                    None => return i32::MAX / 2,
                },
            }
        }
    }

    /// Snaps every node's interval forward so the next `push_end_down` call
    /// measures a per-tile delta instead of a span from the image's start.
    /// Call once per tile, after reading that tile's geometry out of the
    /// graph and before the next `push_end_down` call. Walks the same
    /// `Input -> Split -> children -> ... -> Output` direction as
    /// `push_end_down` itself, so `Split`'s fan-out needs no reconciliation
    /// here: each child is visited exactly once per call.
    pub fn advance_tile(&mut self, id: StageId, axis: Axis) {
        let kind = self.nodes[id.0].kind.clone();
        match kind {
            StageKind::Input { .. } => {
                let end = self.nodes[id.0].state(axis).input.end();
                self.nodes[id.0].state_mut(axis).input.offset = end;
                if let Some(next) = self.nodes[id.0].downstream {
                    self.advance_tile(next, axis);
                }
            }
            StageKind::Split { children } => {
                let end = self.nodes[id.0].state(axis).output.end();
                self.nodes[id.0].state_mut(axis).output.offset = end;
                for child in children {
                    self.advance_tile(child, axis);
                }
            }
            StageKind::Crop { .. } | StageKind::Rescale(_) | StageKind::Context { .. } => {
                let end = self.nodes[id.0].state(axis).output.end();
                self.nodes[id.0].state_mut(axis).output.offset = end;
                if let Some(next) = self.nodes[id.0].downstream {
                    self.advance_tile(next, axis);
                }
            }
            StageKind::Output { .. } => {
                let end = self.nodes[id.0].state(axis).output.end();
                self.nodes[id.0].state_mut(axis).output.offset = end;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Axis;

    fn simple_chain(image_len: i32, out_len: i32) -> (StageGraph, StageId, StageId) {
        let mut g = StageGraph::new();
        let output = g.add(
            StageKind::Output {
                length: out_len,
                max_alignment: 16,
                min_alignment: 2,
                mirrored: false,
            },
            None,
        );
        let crop = g.add(
            StageKind::Crop {
                crop: Crop::new(0, 0),
            },
            Some(output),
        );
        let input = g.add(StageKind::Input { length: image_len, align: 1 }, Some(crop));
        (g, input, output)
    }

    #[test]
    fn identity_chain_covers_whole_image_in_tiles() {
        let (mut g, input, _output) = simple_chain(100, 100);
        g.reset(Axis::X);
        let mut start = 0;
        let mut tiles = 0;
        while start < 100 {
            let end = g.push_end_down(input, Axis::X, start + 32).unwrap();
            assert!(end > start);
            g.advance_tile(input, Axis::X);
            start = end;
            tiles += 1;
            assert!(tiles < 100, "loop should terminate");
        }
        assert_eq!(start, 100);
    }

    #[test]
    fn advance_tile_makes_output_length_per_tile_not_cumulative() {
        let (mut g, input, output) = simple_chain(256, 256);
        g.reset(Axis::X);
        let mut start = 0;
        let mut lengths = Vec::new();
        loop {
            let end = g.push_end_down(input, Axis::X, (start + 128).min(256)).unwrap();
            lengths.push(g.state(output, Axis::X).output.length);
            if end >= 256 {
                break;
            }
            g.advance_tile(input, Axis::X);
            start = end;
        }
        assert_eq!(lengths, vec![128, 128]);
    }

    #[test]
    fn crop_region_length_bounds_the_crop_stage() {
        let mut g = StageGraph::new();
        let output = g.add(
            StageKind::Output {
                length: 50,
                max_alignment: 1,
                min_alignment: 1,
                mirrored: false,
            },
            None,
        );
        let crop = g.add(StageKind::Crop { crop: Crop::new(10, 10) }, Some(output));
        let split = g.add(StageKind::Split { children: vec![crop] }, None);
        g.set_upstream(crop, split);
        let input = g.add(StageKind::Input { length: 100, align: 1 }, Some(split));
        g.reset(Axis::X);
        // Image is 100 wide, cropped 10 off each side: 80 pixels visible.
        let achieved = g.push_end_down(input, Axis::X, 100).unwrap();
        assert_eq!(achieved, 100);
        assert_eq!(g.state(output, Axis::X).output.length, 50);
        assert_eq!(g.state(crop, Axis::X).output.length, 80);
    }
}
