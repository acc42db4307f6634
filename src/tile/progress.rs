use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

/// Observer of a download batch.
///
/// Called from worker tasks, so implementations must be thread-safe.
/// `index` in [`on_tile_complete`](Self::on_tile_complete) is the 1-based
/// number of tiles finished so far, not a position in the grid.
pub trait ProgressCallback: Send + Sync {
    fn on_start(&self, total: usize);
    fn on_tile_complete(&self, index: usize, success: bool);
    fn on_complete(&self);
}

/// Ignores all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {
    fn on_start(&self, _total: usize) {}
    fn on_tile_complete(&self, _index: usize, _success: bool) {}
    fn on_complete(&self) {}
}

/// Logs progress through `tracing` at every 10% step.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicUsize,
    failed: AtomicUsize,
    last_step: AtomicUsize,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressCallback for LogProgress {
    fn on_start(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.last_step.store(0, Ordering::Relaxed);
        info!(total, "Downloading tiles");
    }

    fn on_tile_complete(&self, index: usize, success: bool) {
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return;
        }

        let step = index * 10 / total;
        // Only the first thread to reach a step logs it
        if self.last_step.fetch_max(step, Ordering::Relaxed) < step {
            info!(
                done = index,
                total,
                failed = self.failed.load(Ordering::Relaxed),
                "Download {}% complete",
                step * 10
            );
        }
    }

    fn on_complete(&self) {
        info!(
            total = self.total.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "Tile download finished"
        );
    }
}
