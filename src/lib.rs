//! Back-end configuration preparer and tile planner for a fixed-function
//! image signal processor.
//!
//! Given a frame description — input format, which of the ~20 processing
//! blocks are enabled, output formats, crops and scale targets — [`BackEnd`]
//! validates it, finalises every block's fields, and partitions the frame
//! into a grid of tiles sized to fit the hardware's line-buffer budget.
//!
//! This crate does no image processing, no I/O, and holds no policy over
//! *which* blocks a caller should enable; it only turns a requested frame
//! description into a consistent, tileable configuration or a validation
//! error.

pub mod backend;
pub mod blocks;
pub mod compose;
pub mod config;
pub mod defaults;
pub mod error;
pub mod format;
pub mod geometry;
pub mod json;
pub mod shm;
pub mod stage;
pub mod tiling;

pub use backend::{BackEnd, BackEndConfig, Tile, TilesConfig};
pub use error::{Error, Result};
