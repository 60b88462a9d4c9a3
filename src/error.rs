//! The crate's error type.
//!
//! Every fatal condition from `spec.md` §7 ("Invariant violations") gets a
//! variant here; "configuration-incomplete warnings" are not errors, they are
//! silent auto-fills performed in place by `finalize`/`Prepare`. Following the
//! `MesaResult<T>` / `CLResult<T>` convention used throughout this codebase,
//! a single alias carries the type everywhere instead of spelling out
//! `std::result::Result<T, Error>` at each call site.

use thiserror::Error;

use crate::geometry::Axis;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("image stride {stride} is not aligned to {align} bytes")]
    UnalignedStride { stride: u32, align: u32 },

    #[error("compressed format requires 8 bits per sample, got {bps}")]
    CompressedRequires8Bps { bps: u32 },

    #[error("4:2:0/4:2:2 chroma sampling requires even width, got {width}")]
    OddWidthForSubsampledChroma { width: u32 },

    #[error("4:2:0 chroma sampling requires even height, got {height}")]
    OddHeightForSubsampledChroma { height: u32 },

    #[error("plane size overflowed 2^32 bytes")]
    PlaneSizeOverflow,

    #[error("wallpaper column {x} is not a multiple of 3, required for 10-bit rolls")]
    WallpaperColumnMisaligned { x: u32 },

    #[error("scale factor {scale} is out of range {min}..{max} for {what}")]
    ScaleFactorOutOfRange {
        what: &'static str,
        scale: f64,
        min: f64,
        max: f64,
    },

    #[error("downscale factor must be 1 or in 2..=8, got {0}")]
    InvalidDownscaleFactor(u32),

    #[error("neither bayer nor rgb input is enabled")]
    NoInputEnabled,

    #[error("both bayer and rgb input are enabled")]
    AmbiguousInputEnabled,

    #[error("no output branch is enabled")]
    NoOutputEnabled,

    #[error("compressed output requires the compression block to be enabled")]
    CompressedOutputRequiresCompressionBlock,

    #[error("compression block enabled but no output requests compression")]
    CompressionBlockUnusedByAnyOutput,

    #[error("tdn is enabled but tdn input is disabled and tdn.reset is not set")]
    TdnInputRequired,

    #[error("negative crop start on axis {axis:?}: tile is smaller than the minimum tile size")]
    NegativeCropStart { axis: Axis },

    #[error("branch {branch} made no tiling progress on axis {axis:?} and no sibling branch could either")]
    TilingStalled { branch: usize, axis: Axis },

    #[error("grid step assertion failed for {what}: step {step} * (dim + offset - 1) = {lhs} must be < {rhs}")]
    GridStepOverflow {
        what: &'static str,
        step: u32,
        lhs: u64,
        rhs: u64,
    },

    #[error("per-plane resample phase disagreement of {diff_px} px exceeds half a pixel on branch {branch}")]
    ResamplePhaseDisagreement { branch: usize, diff_px: f64 },

    #[error("resample phase {phase} out of range [0, {bound})")]
    ResamplePhaseOutOfRange { phase: i64, bound: i64 },

    #[error("tile count {0} exceeds the maximum of {1}")]
    TooManyTiles(usize, usize),

    #[error("unknown format name {0:?}")]
    UnknownFormatName(String),

    #[error("{block} setter called with an unsupported field combination: {detail}")]
    InvalidBlockConfig {
        block: &'static str,
        detail: String,
    },

    #[error("json field {0:?} is not part of the block catalogue")]
    UnknownJsonField(String),

    #[error("json deserialisation failed: {0}")]
    Json(String),

    #[error("defaults asset could not be parsed: {0}")]
    DefaultsAsset(String),
}
