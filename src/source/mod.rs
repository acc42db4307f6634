//! Tile-source discovery: what pyramid does a page show, and how deep is it.
//!
//! - [`TileSourceDetector`] turns a [`RenderingContext`](crate::io::RenderingContext)
//!   into [`TileSourceConfig`]s
//! - [`TileSetProbe`] finds the highest level and grid extent of a config

mod config;
mod detect;
pub mod dzi;
mod probe;

pub use config::{DetectionStrategy, TileSourceConfig, DEFAULT_TILE_FORMAT, DEFAULT_TILE_SIZE};
pub use detect::{
    relax_js_literal, TileSourceDetector, DEFAULT_DESCRIPTOR_TIMEOUT, VIEWER_STATE_SCRIPT,
};
pub use probe::{
    ProbeConfig, TileSetProbe, DEFAULT_MAX_LEVEL_BOUND, DEFAULT_MAX_PROBE_TILES,
    DEFAULT_PROBE_TIMEOUT,
};
