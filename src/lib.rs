//! # deepzoom-harvest
//!
//! Acquire deep-zoom tile pyramids of unknown geometry and reconstruct the
//! full-resolution images they contain.
//!
//! A viewer page shows an image as a pyramid of small tiles fetched from
//! `{base}/{level}/{col}_{row}.{ext}`. This library finds that pyramid,
//! works out how deep and how wide it is, downloads the highest level, and
//! stitches the tiles back together. When a page packs several photographs
//! into one pyramid, each is written to its own file.
//!
//! ## Features
//!
//! - **Detection**: Viewer state, page markup, and observed network requests
//! - **Probing**: Binary search for the highest level, bounded grid search
//! - **Downloading**: Bounded concurrency, retries with backoff, resume, cancellation
//! - **Region analysis**: Edge similarity between neighbouring tiles
//! - **Stitching**: JPEG or PNG output with previews and content digests
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`io`] - HTTP client and page rendering context
//! - [`source`] - Tile source detection, DZI descriptors and probing
//! - [`tile`] - Tile coordinates, storage and the concurrent downloader
//! - [`mosaic`] - Region analysis, stitching and encoding
//! - [`pipeline`] - The end-to-end state machine and its report
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use deepzoom_harvest::{HttpPageContext, Pipeline, PipelineConfig, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(ReqwestHttpClient::new()?);
//!     let ctx = HttpPageContext::new(Arc::clone(&client), "https://archive.example.org/view/42");
//!
//!     let mut pipeline = Pipeline::new(client, PipelineConfig::default());
//!     let report = pipeline
//!         .run(&ctx, Path::new("tiles"), Path::new("scan.jpg"))
//!         .await?;
//!
//!     for output in report.outputs() {
//!         println!("{}", output.path.display());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod mosaic;
pub mod pipeline;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, FetchConfig, ProbeCommandConfig, StitchCommandConfig, TuningArgs};
pub use error::{FetchError, PipelineError, RenderError, StitchError, TileDownloadError};
pub use io::{HttpClient, HttpPageContext, RenderingContext, ReqwestHttpClient};
pub use mosaic::{
    edge_similarity, AdjacencyEdge, AnalyzerConfig, EdgeOrientation, MosaicAnalyzer, MosaicRegion,
    MosaicStitcher, OutputFormat, RegionBounds, StitchConfig, StitchedOutput,
};
pub use pipeline::{
    stitch_tile_directory, Pipeline, PipelineConfig, PipelineReport, PipelineState, SourceReport,
    StitchSummary,
};
pub use source::{DetectionStrategy, ProbeConfig, TileSetProbe, TileSourceConfig, TileSourceDetector};
pub use tile::{
    ConcurrentTileDownloader, DownloadConfig, DownloadReport, GridSize, ProgressCallback,
    TileCoordinate, TileRecord, TileStatus, TileStore,
};
