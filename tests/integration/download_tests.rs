//! Concurrent tile download integration tests.
//!
//! Tests verify:
//! - Every grid cell ends in a terminal record
//! - Resume skips tiles already on disk
//! - Retries recover transient failures and give up on persistent ones
//! - Cancellation stops submission without losing finished tiles
//! - Progress is reported once per tile

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use deepzoom_harvest::error::TileDownloadError;
use deepzoom_harvest::tile::{
    ConcurrentTileDownloader, DownloadConfig, GridSize, ProgressCallback, TileCoordinate,
    TileStatus, TileStore, PART_SUFFIX,
};

use super::test_utils::{solid_tile, write_tile, SyntheticTileServer};

fn fast_config() -> DownloadConfig {
    DownloadConfig {
        workers: 4,
        max_retries: 3,
        timeout: Duration::from_secs(1),
        backoff_base: Duration::ZERO,
        warn_threshold: 0.9,
    }
}

fn downloader(server: &Arc<SyntheticTileServer>) -> ConcurrentTileDownloader<SyntheticTileServer> {
    ConcurrentTileDownloader::with_config(Arc::clone(server), fast_config())
}

/// Records every callback for later inspection.
#[derive(Default)]
struct RecordingProgress {
    total: AtomicUsize,
    indices: Mutex<Vec<usize>>,
    completed: AtomicUsize,
}

impl ProgressCallback for RecordingProgress {
    fn on_start(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    fn on_tile_complete(&self, index: usize, _success: bool) {
        if let Ok(mut indices) = self.indices.lock() {
            indices.push(index);
        }
    }

    fn on_complete(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Full Downloads
// =============================================================================

#[tokio::test]
async fn test_download_whole_grid() {
    let server = Arc::new(SyntheticTileServer::new(4, 3, 2));
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path());

    let report = downloader(&server)
        .download(&server.source(), 4, GridSize::new(3, 2), &store)
        .await
        .unwrap();

    assert_eq!(report.attempted, 6);
    assert_eq!(report.succeeded, 6);
    assert_eq!(report.failed, 0);
    assert!(!report.cancelled);
    assert_eq!(server.get_count(), 6);

    // Records come back in (level, row, col) order
    let coords: Vec<_> = report.records.iter().map(|r| r.coord()).collect();
    assert_eq!(coords[0], TileCoordinate::new(4, 0, 0));
    assert_eq!(coords[1], TileCoordinate::new(4, 1, 0));
    assert_eq!(coords[3], TileCoordinate::new(4, 0, 1));

    for record in &report.records {
        assert_eq!(record.status(), TileStatus::Success);
        assert!(record.path().exists());
        assert_eq!(std::fs::metadata(record.path()).unwrap().len(), record.size_bytes());
    }

    let leftovers = std::fs::read_dir(store.level_dir(4))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(PART_SUFFIX))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_resume_issues_no_requests() {
    let server = Arc::new(SyntheticTileServer::new(4, 3, 2));
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path());

    downloader(&server)
        .download(&server.source(), 4, GridSize::new(3, 2), &store)
        .await
        .unwrap();
    server.reset_counts();

    let report = downloader(&server)
        .download(&server.source(), 4, GridSize::new(3, 2), &store)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 6);
    assert_eq!(server.get_count(), 0);
}

#[tokio::test]
async fn test_empty_file_is_downloaded_again() {
    let server = Arc::new(SyntheticTileServer::new(4, 2, 1));
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path());

    write_tile(&store, TileCoordinate::new(4, 0, 0), &solid_tile(256, 256, [1, 2, 3]));
    let empty = store.tile_path(TileCoordinate::new(4, 1, 0), "png");
    std::fs::write(&empty, b"").unwrap();

    let report = downloader(&server)
        .download(&server.source(), 4, GridSize::new(2, 1), &store)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(server.get_count(), 1);
    assert!(std::fs::metadata(&empty).unwrap().len() > 0);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_transient_failure_recovers() {
    let flaky = TileCoordinate::new(4, 1, 1);
    let server = Arc::new(SyntheticTileServer::new(4, 2, 2).with_flaky(flaky, 2));
    let tmp = tempfile::TempDir::new().unwrap();

    let report = downloader(&server)
        .download(&server.source(), 4, GridSize::new(2, 2), &TileStore::new(tmp.path()))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 4);
    assert_eq!(server.get_count(), 4 + 2);
}

#[tokio::test]
async fn test_persistent_failure_is_recorded() {
    let broken = TileCoordinate::new(4, 1, 0);
    let server = Arc::new(SyntheticTileServer::new(4, 2, 2).with_failing(broken));
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path());

    let report = downloader(&server)
        .download(&server.source(), 4, GridSize::new(2, 2), &store)
        .await
        .unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert!(report.success_rate() < 0.9);
    assert_eq!(server.get_count(), 3 + 3);

    let failed: Vec<_> = report.failed_records().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].coord(), broken);
    assert!(failed[0].error().unwrap().contains("3 attempt"));
    assert!(!store.tile_path(broken, "png").exists());
}

#[tokio::test]
async fn test_nothing_downloaded_is_an_error() {
    let server = Arc::new(
        SyntheticTileServer::new(4, 2, 1)
            .with_failing(TileCoordinate::new(4, 0, 0))
            .with_failing(TileCoordinate::new(4, 1, 0)),
    );
    let tmp = tempfile::TempDir::new().unwrap();

    let result = downloader(&server)
        .download(&server.source(), 4, GridSize::new(2, 1), &TileStore::new(tmp.path()))
        .await;

    assert!(matches!(result, Err(TileDownloadError::NoTiles { attempted: 2 })));
}

#[tokio::test]
async fn test_empty_grid_is_an_error() {
    let server = Arc::new(SyntheticTileServer::new(4, 2, 1));
    let tmp = tempfile::TempDir::new().unwrap();

    let result = downloader(&server)
        .download(&server.source(), 4, GridSize::new(0, 0), &TileStore::new(tmp.path()))
        .await;

    assert!(matches!(result, Err(TileDownloadError::NoTiles { attempted: 0 })));
    assert_eq!(server.get_count(), 0);
}

// =============================================================================
// Cancellation and Progress
// =============================================================================

#[tokio::test]
async fn test_cancellation_keeps_finished_tiles() {
    let server = Arc::new(SyntheticTileServer::new(4, 3, 2));
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path());

    write_tile(&store, TileCoordinate::new(4, 0, 0), &solid_tile(256, 256, [9, 9, 9]));
    write_tile(&store, TileCoordinate::new(4, 1, 0), &solid_tile(256, 256, [9, 9, 9]));

    let token = CancellationToken::new();
    token.cancel();

    let report = downloader(&server)
        .with_cancellation(token)
        .download(&server.source(), 4, GridSize::new(3, 2), &store)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.attempted, 6);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 4);
    assert_eq!(server.get_count(), 0);
    assert!(report
        .failed_records()
        .all(|r| r.error().unwrap().contains("cancelled")));
}

#[tokio::test]
async fn test_progress_reports_every_tile() {
    let server = Arc::new(SyntheticTileServer::new(4, 4, 3).with_failing(TileCoordinate::new(4, 2, 2)));
    let tmp = tempfile::TempDir::new().unwrap();
    let progress = Arc::new(RecordingProgress::default());

    downloader(&server)
        .with_progress(progress.clone())
        .download(&server.source(), 4, GridSize::new(4, 3), &TileStore::new(tmp.path()))
        .await
        .unwrap();

    assert_eq!(progress.total.load(Ordering::SeqCst), 12);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 1);

    let mut indices = progress.indices.lock().unwrap().clone();
    indices.sort_unstable();
    assert_eq!(indices, (1..=12).collect::<Vec<_>>());
}
