//! Concurrent tile download with bounded parallelism.
//!
//! # Two-Phase Approach
//!
//! 1. **Resume phase:** every tile whose file already exists with non-zero
//!    size is recorded as a success without touching the network.
//!
//! 2. **Download phase:** remaining tiles are spawned one at a time as
//!    semaphore permits become available, so at most `workers` requests are in
//!    flight and no task waits on a permit it does not hold.
//!
//! ```text
//!   queue ──► acquire permit ──► spawn ──► get ─┬─ ok ──► .part ──► rename ──► Success
//!     ▲          (or cancel)                    └─ err ─► backoff ─► retry ... Failed
//!     └── unsubmitted on cancel ──────────────────────────────────────────────► Failed
//! ```
//!
//! Each task returns its own [`TileRecord`]; the collector owns the final
//! vector. Only the completion counter is shared between tasks.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DownloadReport, GridSize, NoopProgress, ProgressCallback, TileCoordinate, TileRecord, TileStore,
};
use crate::error::{FetchError, TileDownloadError};
use crate::io::HttpClient;
use crate::source::TileSourceConfig;

/// Default number of concurrent downloads.
pub const DEFAULT_WORKERS: usize = 8;

/// Default attempts per tile.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default timeout per tile request.
pub const DEFAULT_TILE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default base of the exponential retry backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Success fraction below which a batch logs a warning.
pub const DEFAULT_WARN_THRESHOLD: f64 = 0.9;

/// Downloader tuning.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub workers: usize,
    pub max_retries: u32,
    pub timeout: Duration,
    /// Attempt `n > 0` sleeps `backoff_base * 2^n` first
    pub backoff_base: Duration,
    pub warn_threshold: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TILE_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            warn_threshold: DEFAULT_WARN_THRESHOLD,
        }
    }
}

impl DownloadConfig {
    /// Delay before attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.backoff_base.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Fetches every tile of one level into a [`TileStore`].
pub struct ConcurrentTileDownloader<C: HttpClient> {
    client: Arc<C>,
    config: DownloadConfig,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl<C: HttpClient + 'static> ConcurrentTileDownloader<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, DownloadConfig::default())
    }

    pub fn with_config(client: Arc<C>, config: DownloadConfig) -> Self {
        Self {
            client,
            config,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop submitting tiles once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Download the dense `grid` at `level`.
    ///
    /// Individual tile failures are recorded in the report. Only a batch in
    /// which no tile succeeded is an error.
    pub async fn download(
        &self,
        source: &TileSourceConfig,
        level: u32,
        grid: GridSize,
        store: &TileStore,
    ) -> Result<DownloadReport, TileDownloadError> {
        let coords = grid.coordinates(level);
        if coords.is_empty() {
            return Err(TileDownloadError::NoTiles { attempted: 0 });
        }

        store
            .prepare_level(level)
            .await
            .map_err(|e| TileDownloadError::Io(format!("{}: {}", store.level_dir(level).display(), e)))?;

        let total = coords.len();
        self.progress.on_start(total);
        let completed = Arc::new(AtomicUsize::new(0));

        // Phase 1: resume from disk
        let mut records = Vec::with_capacity(total);
        let mut queue = VecDeque::new();
        for coord in coords {
            let path = store.tile_path(coord, source.format());
            let record = TileRecord::pending(coord, source.tile_url(coord), path);

            match tokio::fs::metadata(record.path()).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    let index = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    self.progress.on_tile_complete(index, true);
                    records.push(record.complete_success(meta.len()));
                }
                _ => queue.push_back(record),
            }
        }

        debug!(
            level,
            grid = %grid,
            resumed = records.len(),
            to_download = queue.len(),
            "Resume check complete"
        );

        // Phase 2: permit-bounded downloads
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<TileCoordinate, TileRecord> = HashMap::new();
        let mut cancelled = false;

        while let Some(record) = queue.pop_front() {
            let permit = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    queue.push_front(record);
                    cancelled = true;
                    break;
                }

                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        queue.push_front(record);
                        cancelled = true;
                        break;
                    }
                },
            };

            in_flight.insert(record.coord(), record.clone());

            let client = Arc::clone(&self.client);
            let config = self.config.clone();
            let progress = Arc::clone(&self.progress);
            let completed = Arc::clone(&completed);

            tasks.spawn(async move {
                let _permit = permit;
                let record = fetch_tile(client.as_ref(), record, &config).await;
                let index = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress.on_tile_complete(index, record.is_success());
                record
            });
        }

        if cancelled {
            info!(level, unsubmitted = queue.len(), "Download cancelled, stopping submission");
            records.extend(
                queue
                    .drain(..)
                    .map(|r| r.complete_failure(TileDownloadError::Cancelled.to_string())),
            );
        }

        // Join barrier
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(record) => {
                    in_flight.remove(&record.coord());
                    records.push(record);
                }
                Err(e) => warn!(level, error = %e, "Tile task failed"),
            }
        }

        for (_, record) in in_flight.drain() {
            let index = completed.fetch_add(1, Ordering::SeqCst) + 1;
            self.progress.on_tile_complete(index, false);
            records.push(record.complete_failure("Tile task aborted"));
        }

        self.progress.on_complete();

        let report = DownloadReport::from_records(level, grid, records, cancelled);

        if report.succeeded == 0 {
            warn!(level, attempted = report.attempted, "No tiles downloaded");
            return Err(TileDownloadError::NoTiles {
                attempted: report.attempted,
            });
        }

        let rate = report.success_rate();
        if rate < self.config.warn_threshold {
            warn!(
                level,
                succeeded = report.succeeded,
                failed = report.failed,
                "Only {:.1}% of tiles downloaded",
                rate * 100.0
            );
        } else {
            info!(
                level,
                succeeded = report.succeeded,
                failed = report.failed,
                "Tile download complete"
            );
        }

        Ok(report)
    }
}

/// Fetch one tile with retries and write it atomically.
async fn fetch_tile<C>(client: &C, record: TileRecord, config: &DownloadConfig) -> TileRecord
where
    C: HttpClient + ?Sized,
{
    let attempts = config.max_retries.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        let delay = config.backoff(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match client.get(record.url(), config.timeout).await {
            Ok(body) if body.is_empty() => {
                last_error = FetchError::EmptyBody(record.url().to_string()).to_string();
            }
            Ok(body) => {
                return match write_atomic(record.path(), &body).await {
                    Ok(()) => record.complete_success(body.len() as u64),
                    Err(e) => {
                        let error = TileDownloadError::Io(format!("{}: {}", record.path().display(), e));
                        warn!(coord = %record.coord(), error = %error, "Tile write failed");
                        record.complete_failure(error.to_string())
                    }
                };
            }
            Err(e) => {
                debug!(coord = %record.coord(), attempt = attempt + 1, error = %e, "Tile fetch failed");
                last_error = e.to_string();
            }
        }
    }

    let error = TileDownloadError::RetriesExhausted {
        attempts,
        last_error,
    };
    warn!(coord = %record.coord(), error = %error, "Tile failed");
    record.complete_failure(error.to_string())
}

/// Write to `{path}.part` and rename into place.
async fn write_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let part = TileStore::part_path(path);
    if let Err(e) = tokio::fs::write(&part, body).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    tokio::fs::rename(&part, path).await
}
