//! Configuration management for deepzoom-harvest.
//!
//! This module provides the command-line interface:
//! - Subcommands `fetch`, `stitch` and `probe` via clap
//! - Environment variables with `DZH_` prefix
//! - Defaults taken from the component constants
//!
//! # Example
//!
//! ```ignore
//! use deepzoom_harvest::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! match cli.into_command() {
//!     Command::Fetch(config) => println!("Fetching {}", config.url),
//!     _ => {}
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `DZH_URL` - Viewer page URL (fetch, probe)
//! - `DZH_OUTPUT` - Output image base path (default: mosaic.jpg)
//! - `DZH_WORK_DIR` - Tile directory (default: tiles)
//! - `DZH_REQUEST_LOG` - File of captured request URLs for traffic detection
//! - `DZH_USER_AGENT` - User-Agent for all requests
//! - `DZH_WORKERS` - Concurrent tile downloads (default: 8)
//! - `DZH_MAX_RETRIES` - Attempts per tile (default: 3)
//! - `DZH_PROBE_TIMEOUT` - Probe timeout in seconds (default: 5)
//! - `DZH_TILE_TIMEOUT` - Tile timeout in seconds (default: 30)
//! - `DZH_BACKOFF_MS` - Retry backoff base in milliseconds (default: 1000)
//! - `DZH_SIMILARITY_THRESHOLD` - Edge continuity threshold (default: 0.7)
//! - `DZH_STRIP_WIDTH` - Edge strip width in pixels (default: 10)
//! - `DZH_QUALITY` - Output JPEG quality (default: 95)
//! - `DZH_PREVIEW_QUALITY` - Preview JPEG quality (default: 85)
//! - `DZH_PREVIEW_MAX_SIDE` - Preview size cap in pixels (default: 1200)
//! - `DZH_MAX_LEVEL` - Level search bound (default: 20)
//! - `DZH_MAX_PROBE_TILES` - Grid probe cap per axis (default: 50)
//! - `DZH_WARN_THRESHOLD` - Success fraction that triggers a warning (default: 0.9)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::io::DEFAULT_USER_AGENT;
use crate::mosaic::{
    is_valid_quality, AnalyzerConfig, StitchConfig, DEFAULT_OUTPUT_QUALITY, DEFAULT_PREVIEW_MAX_SIDE,
    DEFAULT_PREVIEW_QUALITY, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_STRIP_WIDTH,
};
use crate::pipeline::PipelineConfig;
use crate::source::{ProbeConfig, DEFAULT_DESCRIPTOR_TIMEOUT, DEFAULT_MAX_LEVEL_BOUND, DEFAULT_MAX_PROBE_TILES};
use crate::tile::{DownloadConfig, DEFAULT_MAX_RETRIES, DEFAULT_WARN_THRESHOLD, DEFAULT_WORKERS};

// =============================================================================
// Default Values
// =============================================================================

/// Default output image base path.
pub const DEFAULT_OUTPUT: &str = "mosaic.jpg";

/// Default tile work directory.
pub const DEFAULT_WORK_DIR: &str = "tiles";

/// Default probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default tile timeout in seconds.
pub const DEFAULT_TILE_TIMEOUT_SECS: u64 = 30;

/// Default retry backoff base in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

// =============================================================================
// CLI Arguments
// =============================================================================

/// deepzoom-harvest - download deep-zoom tile pyramids and rebuild the images.
#[derive(Parser, Debug, Clone)]
#[command(name = "deepzoom-harvest")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Detect, download and stitch the images shown on a viewer page
    Fetch(FetchConfig),
    /// Stitch an existing tile directory
    Stitch(StitchCommandConfig),
    /// Detect tile sources and probe their geometry without downloading
    Probe(ProbeCommandConfig),
}

/// Tuning shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct TuningArgs {
    /// Concurrent tile downloads.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "DZH_WORKERS")]
    pub workers: usize,

    /// Attempts per tile before it is recorded as failed.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "DZH_MAX_RETRIES")]
    pub max_retries: u32,

    /// Timeout of each existence probe, in seconds.
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_SECS, env = "DZH_PROBE_TIMEOUT")]
    pub probe_timeout: u64,

    /// Timeout of each tile download, in seconds.
    #[arg(long, default_value_t = DEFAULT_TILE_TIMEOUT_SECS, env = "DZH_TILE_TIMEOUT")]
    pub tile_timeout: u64,

    /// Base of the exponential retry backoff, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_BACKOFF_MS, env = "DZH_BACKOFF_MS")]
    pub backoff_ms: u64,

    /// Minimum edge similarity for two tiles to belong to one image (0-1].
    #[arg(long, default_value_t = DEFAULT_SIMILARITY_THRESHOLD, env = "DZH_SIMILARITY_THRESHOLD")]
    pub similarity_threshold: f64,

    /// Width in pixels of the edge strips compared between tiles.
    #[arg(long, default_value_t = DEFAULT_STRIP_WIDTH, env = "DZH_STRIP_WIDTH")]
    pub strip_width: u32,

    /// Treat all tiles of a level as one image instead of separating regions.
    #[arg(long, default_value_t = false)]
    pub single_image: bool,

    /// JPEG quality of full-size outputs (1-100).
    #[arg(long, default_value_t = DEFAULT_OUTPUT_QUALITY, env = "DZH_QUALITY")]
    pub quality: u8,

    /// JPEG quality of previews (1-100).
    #[arg(long, default_value_t = DEFAULT_PREVIEW_QUALITY, env = "DZH_PREVIEW_QUALITY")]
    pub preview_quality: u8,

    /// Longest side of previews; larger outputs get one.
    #[arg(long, default_value_t = DEFAULT_PREVIEW_MAX_SIDE, env = "DZH_PREVIEW_MAX_SIDE")]
    pub preview_max_side: u32,

    /// Do not write previews.
    #[arg(long, default_value_t = false)]
    pub no_preview: bool,

    /// Highest level searched when the source does not state one.
    #[arg(long, default_value_t = DEFAULT_MAX_LEVEL_BOUND, env = "DZH_MAX_LEVEL")]
    pub max_level: u32,

    /// Maximum tiles probed along each grid axis.
    #[arg(long, default_value_t = DEFAULT_MAX_PROBE_TILES, env = "DZH_MAX_PROBE_TILES")]
    pub max_probe_tiles: u32,

    /// Success fraction below which a warning is logged.
    #[arg(long, default_value_t = DEFAULT_WARN_THRESHOLD, env = "DZH_WARN_THRESHOLD")]
    pub warn_threshold: f64,
}

impl Default for TuningArgs {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            probe_timeout: DEFAULT_PROBE_TIMEOUT_SECS,
            tile_timeout: DEFAULT_TILE_TIMEOUT_SECS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            strip_width: DEFAULT_STRIP_WIDTH,
            single_image: false,
            quality: DEFAULT_OUTPUT_QUALITY,
            preview_quality: DEFAULT_PREVIEW_QUALITY,
            preview_max_side: DEFAULT_PREVIEW_MAX_SIDE,
            no_preview: false,
            max_level: DEFAULT_MAX_LEVEL_BOUND,
            max_probe_tiles: DEFAULT_MAX_PROBE_TILES,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}

impl TuningArgs {
    /// Validate the tuning values and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be greater than 0".to_string());
        }
        if self.probe_timeout == 0 || self.tile_timeout == 0 {
            return Err("timeouts must be greater than 0 seconds".to_string());
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err("similarity_threshold must be in (0, 1]".to_string());
        }
        if self.strip_width == 0 {
            return Err("strip_width must be greater than 0".to_string());
        }
        if !is_valid_quality(self.quality) {
            return Err("quality must be between 1 and 100".to_string());
        }
        if !is_valid_quality(self.preview_quality) {
            return Err("preview_quality must be between 1 and 100".to_string());
        }
        if self.preview_max_side == 0 {
            return Err("preview_max_side must be greater than 0".to_string());
        }
        if self.max_probe_tiles == 0 {
            return Err("max_probe_tiles must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.warn_threshold) {
            return Err("warn_threshold must be between 0 and 1".to_string());
        }
        Ok(())
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            threshold: self.similarity_threshold,
            strip_width: self.strip_width,
            separate_images: !self.single_image,
        }
    }

    pub fn stitch_config(&self) -> StitchConfig {
        StitchConfig {
            output_quality: self.quality,
            preview_quality: self.preview_quality,
            preview_max_side: self.preview_max_side,
            write_preview: !self.no_preview,
        }
    }

    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
            probe: ProbeConfig {
                timeout: Duration::from_secs(self.probe_timeout),
                max_level_bound: self.max_level,
                max_probe_tiles: self.max_probe_tiles,
            },
            download: DownloadConfig {
                workers: self.workers,
                max_retries: self.max_retries,
                timeout: Duration::from_secs(self.tile_timeout),
                backoff_base: Duration::from_millis(self.backoff_ms),
                warn_threshold: self.warn_threshold,
            },
            analyzer: self.analyzer_config(),
            stitch: self.stitch_config(),
        }
    }
}

/// Arguments of `fetch`.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    /// Viewer page URL.
    #[arg(env = "DZH_URL")]
    pub url: String,

    /// Output image base path; extension selects JPEG or PNG.
    #[arg(short, long, default_value = DEFAULT_OUTPUT, env = "DZH_OUTPUT")]
    pub output: PathBuf,

    /// Directory tiles are downloaded into (kept for resume).
    #[arg(long, default_value = DEFAULT_WORK_DIR, env = "DZH_WORK_DIR")]
    pub work_dir: PathBuf,

    /// File of request URLs captured while the page loaded.
    #[arg(long, env = "DZH_REQUEST_LOG")]
    pub request_log: Option<PathBuf>,

    /// User-Agent sent with every request.
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "DZH_USER_AGENT")]
    pub user_agent: String,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Hide the progress bar.
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_page_url(&self.url)?;
        self.tuning.validate()
    }
}

/// Arguments of `stitch`.
#[derive(Args, Debug, Clone)]
pub struct StitchCommandConfig {
    /// Tile directory: a work directory, a `level_N` directory or a flat
    /// directory of `*_tile_{col}_{row}.{ext}` files.
    pub dir: PathBuf,

    /// Output image base path; extension selects JPEG or PNG.
    #[arg(short, long, default_value = DEFAULT_OUTPUT, env = "DZH_OUTPUT")]
    pub output: PathBuf,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StitchCommandConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.tuning.validate()
    }
}

/// Arguments of `probe`.
#[derive(Args, Debug, Clone)]
pub struct ProbeCommandConfig {
    /// Viewer page URL.
    #[arg(env = "DZH_URL")]
    pub url: String,

    /// File of request URLs captured while the page loaded.
    #[arg(long, env = "DZH_REQUEST_LOG")]
    pub request_log: Option<PathBuf>,

    /// User-Agent sent with every request.
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "DZH_USER_AGENT")]
    pub user_agent: String,

    #[command(flatten)]
    pub tuning: TuningArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ProbeCommandConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_page_url(&self.url)?;
        self.tuning.validate()
    }
}

fn validate_page_url(url: &str) -> Result<(), String> {
    match url::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(format!("Unsupported URL scheme: {}", parsed.scheme())),
        Err(e) => Err(format!("Invalid page URL '{}': {}", url, e)),
    }
}

// =============================================================================
// Tests
// =============================================================================
