//! Mosaic reconstruction: from tile files to full-resolution images.
//!
//! - [`MosaicAnalyzer`] splits the downloaded tiles into [`MosaicRegion`]s,
//!   one per physical image
//! - [`MosaicStitcher`] composites each region and writes it with
//!   [`MosaicEncoder`]

mod analyzer;
mod encoder;
mod region;
mod stitcher;

pub use analyzer::{
    edge_similarity, AnalyzerConfig, MosaicAnalyzer, DEFAULT_SIMILARITY_THRESHOLD,
    DEFAULT_STRIP_WIDTH,
};
pub use encoder::{
    clamp_quality, is_valid_quality, MosaicEncoder, OutputFormat, DEFAULT_OUTPUT_QUALITY,
    DEFAULT_PREVIEW_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use region::{AdjacencyEdge, EdgeOrientation, MosaicRegion, RegionBounds};
pub use stitcher::{
    majority_tile_size, preview_path, region_output_path, MosaicImage, MosaicStitcher,
    StitchConfig, StitchedOutput, DEFAULT_PREVIEW_MAX_SIDE,
};
