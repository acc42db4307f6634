//! End-to-end pipeline integration tests.
//!
//! Tests verify:
//! - Page to image through traffic and descriptor detection
//! - The JSON report is written on success and on failure
//! - Sources that cannot be probed are skipped
//! - A source that yields zero tiles fails the run

use std::sync::Arc;
use std::time::Duration;

use image::Rgb;

use deepzoom_harvest::error::{PipelineError, TileDownloadError};
use deepzoom_harvest::pipeline::{report_path, Pipeline, PipelineConfig, PipelineReport, PipelineState};
use deepzoom_harvest::tile::TileCoordinate;
use deepzoom_harvest::DownloadConfig;

use super::test_utils::{generate_dzi_xml, open_rgb, solid_tile, StaticPage, SyntheticTileServer};

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.download = DownloadConfig {
        backoff_base: Duration::ZERO,
        ..DownloadConfig::default()
    };
    config.stitch.write_preview = false;
    config
}

fn read_report(path: &std::path::Path) -> PipelineReport {
    let json = std::fs::read(path).expect("report written");
    serde_json::from_slice(&json).expect("report parses")
}

// =============================================================================
// Successful Runs
// =============================================================================

#[tokio::test]
async fn test_traffic_source_end_to_end() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_requests(&["https://tiles.test/scan_files/2/0_0.png"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let output = tmp.path().join("scan.png");

    let mut pipeline = Pipeline::new(Arc::clone(&server), test_config());
    let report = pipeline
        .run(&page, &tmp.path().join("tiles"), &output)
        .await
        .unwrap();

    assert_eq!(pipeline.state(), PipelineState::Done);
    assert_eq!(report.final_state, PipelineState::Done);
    assert!(report.warnings.is_empty());

    let source = &report.sources[0];
    assert_eq!(source.level, Some(3));
    assert_eq!(source.grid.map(|g| (g.cols, g.rows)), Some((2, 2)));
    assert_eq!(source.download.as_ref().unwrap().succeeded, 4);

    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].path, output);
    assert_eq!((outputs[0].width, outputs[0].height), (512, 512));
    assert!(tmp.path().join("tiles/level_3/1_1.png").exists());

    let written = read_report(&report_path(&output));
    assert_eq!(written, report);
}

#[tokio::test]
async fn test_descriptor_source_end_to_end() {
    let server = Arc::new(
        SyntheticTileServer::new(9, 2, 2)
            .with_document(
                "https://tiles.test/scan.dzi",
                generate_dzi_xml(512, 512, 256, 0, "png"),
            )
            .with_tiles(|col, row| {
                if (col + row) % 2 == 0 {
                    solid_tile(256, 256, [200, 200, 200])
                } else {
                    solid_tile(256, 256, [195, 195, 195])
                }
            }),
    );
    let page = StaticPage::new().with_markup(r#"<div class="viewer" data-dzi="/scan.dzi"></div>"#);
    let tmp = tempfile::TempDir::new().unwrap();
    let output = tmp.path().join("page.png");

    let report = Pipeline::new(Arc::clone(&server), test_config())
        .run(&page, &tmp.path().join("tiles"), &output)
        .await
        .unwrap();

    let source = &report.sources[0];
    assert_eq!(source.config.max_level(), Some(9));
    assert_eq!(source.level, Some(9));

    let image = open_rgb(&output);
    assert_eq!(image.dimensions(), (512, 512));
    assert_eq!(*image.get_pixel(10, 10), Rgb([200, 200, 200]));
    assert_eq!(*image.get_pixel(300, 10), Rgb([195, 195, 195]));
}

#[tokio::test]
async fn test_rerun_resumes_from_disk() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_requests(&["https://tiles.test/scan_files/3/0_0.png"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let work = tmp.path().join("tiles");
    let output = tmp.path().join("scan.png");

    Pipeline::new(Arc::clone(&server), test_config())
        .run(&page, &work, &output)
        .await
        .unwrap();
    server.reset_counts();

    let report = Pipeline::new(Arc::clone(&server), test_config())
        .run(&page, &work, &output)
        .await
        .unwrap();

    assert_eq!(server.get_count(), 0);
    assert_eq!(report.outputs().count(), 1);
}

#[tokio::test]
async fn test_failed_tiles_are_warned_about() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2).with_failing(TileCoordinate::new(3, 1, 1)));
    let page = StaticPage::new().with_requests(&["https://tiles.test/scan_files/3/0_0.png"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let output = tmp.path().join("scan.png");

    let report = Pipeline::new(server, test_config())
        .run(&page, &tmp.path().join("tiles"), &output)
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("1 of 4"));

    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs[0].missing, vec![TileCoordinate::new(3, 1, 1)]);
    assert_eq!(*open_rgb(&output).get_pixel(300, 300), Rgb([0, 0, 0]));
}

#[tokio::test]
async fn test_unprobeable_source_is_skipped() {
    let server = Arc::new(
        SyntheticTileServer::new(9, 2, 2).with_document(
            "https://tiles.test/scan.dzi",
            generate_dzi_xml(512, 512, 256, 0, "png"),
        ),
    );
    let page = StaticPage::new()
        .with_markup(r#"<div data-dzi="/scan.dzi"></div>"#)
        .with_requests(&["https://tiles.test/other_files/5/0_0.jpg"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let work = tmp.path().join("tiles");
    let output = tmp.path().join("book.png");

    let report = Pipeline::new(server, test_config())
        .run(&page, &work, &output)
        .await
        .unwrap();

    assert_eq!(report.final_state, PipelineState::Done);
    assert_eq!(report.sources.len(), 2);
    assert!(report.sources[0].error.is_none());
    assert!(report.sources[1].error.as_ref().unwrap().contains("Probe inconclusive"));
    assert_eq!(report.warnings.len(), 1);

    // Several sources: per-source directories and output names
    let outputs: Vec<_> = report.outputs().collect();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].path, tmp.path().join("book_s1.png"));
    assert!(work.join("source_1/level_9").is_dir());
    assert!(!work.join("source_2").exists());
}

// =============================================================================
// Failed Runs
// =============================================================================

#[tokio::test]
async fn test_no_source_fails_with_report() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_markup("<html><body>No viewer here</body></html>");
    let tmp = tempfile::TempDir::new().unwrap();
    let output = tmp.path().join("none.jpg");

    let mut pipeline = Pipeline::new(server, test_config());
    let result = pipeline.run(&page, &tmp.path().join("tiles"), &output).await;

    assert!(matches!(result, Err(PipelineError::ConfigNotFound { .. })));
    assert_eq!(pipeline.state(), PipelineState::Failed);

    let report = read_report(&report_path(&output));
    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(report.sources.is_empty());
    assert_eq!(report.warnings.len(), 1);
}

#[tokio::test]
async fn test_zero_tiles_fails_and_cleans_up() {
    let server = Arc::new(
        SyntheticTileServer::new(3, 2, 2)
            .with_failing(TileCoordinate::new(3, 0, 0))
            .with_failing(TileCoordinate::new(3, 1, 0))
            .with_failing(TileCoordinate::new(3, 0, 1))
            .with_failing(TileCoordinate::new(3, 1, 1)),
    );
    let page = StaticPage::new().with_requests(&["https://tiles.test/scan_files/3/0_0.png"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let work = tmp.path().join("tiles");
    let output = tmp.path().join("scan.jpg");

    let mut pipeline = Pipeline::new(server, test_config());
    let result = pipeline.run(&page, &work, &output).await;

    assert!(matches!(
        result,
        Err(PipelineError::TileDownload(TileDownloadError::NoTiles { attempted: 4 }))
    ));
    assert_eq!(pipeline.state(), PipelineState::Failed);
    assert!(!work.join("level_3").exists());
    assert!(!output.exists());

    let report = read_report(&report_path(&output));
    assert_eq!(report.final_state, PipelineState::Failed);
    assert!(report.sources[0].error.as_ref().unwrap().contains("No tiles downloaded"));
}

#[tokio::test]
async fn test_pipeline_runs_once() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_requests(&["https://tiles.test/scan_files/3/0_0.png"]);
    let tmp = tempfile::TempDir::new().unwrap();
    let output = tmp.path().join("scan.png");

    let mut pipeline = Pipeline::new(server, test_config());
    pipeline.run(&page, &tmp.path().join("tiles"), &output).await.unwrap();

    let again = pipeline.run(&page, &tmp.path().join("tiles"), &output).await;
    assert!(matches!(again, Err(PipelineError::IllegalTransition { .. })));
}
