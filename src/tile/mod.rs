//! Tile acquisition layer.
//!
//! This module turns a probed `(level, grid)` into tile files on disk.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       ConcurrentTileDownloader          │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  Semaphore   │  │  Retry/backoff  │  │
//! │  │  + JoinSet   │  │  per tile task  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────┬────────────┘
//!            │                 │
//!            ▼                 ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │     TileStore      │ │ ProgressCallback │
//! │ level_N/{c}_{r}.ext│ └──────────────────┘
//! └────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileCoordinate`] / [`GridSize`]: addressing, row-major ordered
//! - [`TileRecord`]: per-tile outcome, `Pending` until completed exactly once
//! - [`TileStore`]: on-disk layout and directory reader
//! - [`ConcurrentTileDownloader`]: bounded, resumable, cancellable download
//! - [`DownloadReport`]: serializable batch summary

mod coord;
mod downloader;
mod progress;
mod record;
mod report;
mod store;

pub use coord::{GridSize, TileCoordinate};
pub use downloader::{
    ConcurrentTileDownloader, DownloadConfig, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES,
    DEFAULT_TILE_TIMEOUT, DEFAULT_WARN_THRESHOLD, DEFAULT_WORKERS,
};
pub use progress::{LogProgress, NoopProgress, ProgressCallback};
pub use record::{TileRecord, TileStatus};
pub use report::DownloadReport;
pub use store::{TileStore, PART_SUFFIX};
