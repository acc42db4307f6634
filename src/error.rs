use std::path::PathBuf;

use thiserror::Error;

/// Errors from a single HTTP exchange with a tile server or page host.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The per-call timeout elapsed
    #[error("Request timed out after {timeout_ms}ms: {url}")]
    Timeout { url: String, timeout_ms: u64 },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered 2xx with no body
    #[error("Empty response body: {0}")]
    EmptyBody(String),
}

impl FetchError {
    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404 | 410, .. })
    }
}

/// Errors raised by a rendering context.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// The context cannot provide this capability (e.g. no script engine)
    #[error("Rendering context does not support {0}")]
    Unsupported(&'static str),

    /// Script evaluation failed inside the page
    #[error("Script execution failed: {0}")]
    Script(String),

    /// Fetching the page failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// Tile download failures.
///
/// `RetriesExhausted` and `Cancelled` describe a single tile and end up as the
/// error string of its [`TileRecord`](crate::tile::TileRecord). `NoTiles` is
/// the batch-level failure that aborts a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum TileDownloadError {
    /// Every attempt for one tile failed
    #[error("Retries exhausted after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The tile was never submitted because the run was cancelled
    #[error("Download cancelled before the tile was fetched")]
    Cancelled,

    /// Not a single tile of the batch could be obtained
    #[error("No tiles downloaded: all {attempted} tile(s) failed")]
    NoTiles { attempted: usize },

    /// Local storage could not be prepared
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors raised while stitching one region.
#[derive(Debug, Clone, Error)]
pub enum StitchError {
    /// Tile directory does not exist
    #[error("Tile directory does not exist: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// Tile directory holds no recognizable tiles
    #[error("No tiles found in directory: {}", .0.display())]
    EmptyDirectory(PathBuf),

    /// None of the region's tiles could be placed
    #[error("Region {region} has no placeable tiles")]
    NoPlaceableTiles { region: usize },

    /// A tile or output could not be decoded
    #[error("Failed to decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },

    /// Encoding the stitched raster failed
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// Writing output failed
    #[error("I/O error: {0}")]
    Io(String),
}

/// Pipeline-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No tile source could be detected for the page
    #[error("No tile source detected on {page_url}: no image available")]
    ConfigNotFound { page_url: String },

    /// Level or grid discovery found no tiles for a source
    #[error("Probe inconclusive for {base_url}: no tiles found")]
    ProbeInconclusive { base_url: String },

    #[error(transparent)]
    TileDownload(#[from] TileDownloadError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    /// Filesystem or task failure outside a single tile
    #[error("I/O error: {0}")]
    Io(String),

    /// The JSON report could not be produced
    #[error("Failed to write report: {0}")]
    Report(String),

    /// The state machine refused a transition
    #[error("Illegal pipeline transition from {from} to {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
}
