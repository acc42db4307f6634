//! Tile source detection integration tests.
//!
//! Tests verify:
//! - Each strategy finds sources on its own
//! - Descriptors are fetched and their geometry applied
//! - Duplicate sources across strategies collapse to one
//! - Pages without a viewer yield nothing

use std::sync::Arc;

use deepzoom_harvest::source::{DetectionStrategy, TileSourceDetector};

use super::test_utils::{generate_dzi_xml, StaticPage, SyntheticTileServer, BASE_URL};

const DESCRIPTOR_URL: &str = "https://tiles.test/scan.dzi";

fn server_with_descriptor() -> Arc<SyntheticTileServer> {
    Arc::new(
        SyntheticTileServer::new(9, 2, 2)
            .with_document(DESCRIPTOR_URL, generate_dzi_xml(512, 512, 256, 0, "png")),
    )
}

// =============================================================================
// Single Strategies
// =============================================================================

#[tokio::test]
async fn test_detect_from_traffic() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_requests(&[
        "https://tiles.test/app.js",
        "https://tiles.test/scan_files/3/0_0.png",
        "https://tiles.test/scan_files/3/1_0.png",
    ]);

    let config = TileSourceDetector::new(server)
        .detect(&page)
        .await
        .expect("source detected");

    assert_eq!(config.base_url(), BASE_URL);
    assert_eq!(config.format(), "png");
    assert_eq!(config.strategy(), DetectionStrategy::Traffic);
    assert_eq!(config.max_level(), None);
}

#[tokio::test]
async fn test_detect_descriptor_from_markup() {
    let server = server_with_descriptor();
    let page = StaticPage::new().with_markup(
        r#"<html><div id="osd" data-dzi="/scan.dzi"></div>
           <script>OpenSeadragon({ id: "osd", tileSources: "/scan.dzi" });</script></html>"#,
    );

    let configs = TileSourceDetector::new(Arc::clone(&server)).detect_all(&page).await;

    assert_eq!(configs.len(), 1);
    let config = &configs[0];
    assert_eq!(config.base_url(), BASE_URL);
    assert_eq!(config.tile_size(), 256);
    assert_eq!(config.format(), "png");
    assert_eq!((config.width(), config.height()), (Some(512), Some(512)));
    assert_eq!(config.max_level(), Some(9));
    assert_eq!(config.strategy(), DetectionStrategy::StaticMarkup);

    // Descriptor fetched once despite appearing twice
    assert_eq!(server.get_count(), 1);
}

#[tokio::test]
async fn test_detect_from_live_state() {
    let server = server_with_descriptor();
    let page = StaticPage::new().with_state(serde_json::json!({
        "found": true,
        "tileSources": [DESCRIPTOR_URL],
    }));

    let config = TileSourceDetector::new(server).detect(&page).await.unwrap();

    assert_eq!(config.strategy(), DetectionStrategy::LiveState);
    assert_eq!(config.max_level(), Some(9));
}

// =============================================================================
// Combined Strategies
// =============================================================================

#[tokio::test]
async fn test_duplicate_sources_collapse_in_priority_order() {
    let server = server_with_descriptor();
    let page = StaticPage::new()
        .with_state(serde_json::json!({"found": true, "tileSources": [DESCRIPTOR_URL]}))
        .with_markup(r#"<script>var src = "/scan.dzi";</script>"#)
        .with_requests(&["https://tiles.test/scan_files/9/0_0.png"]);

    let configs = TileSourceDetector::new(server).detect_all(&page).await;

    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].strategy(), DetectionStrategy::LiveState);
}

#[tokio::test]
async fn test_distinct_sources_are_all_returned() {
    let server = server_with_descriptor();
    let page = StaticPage::new()
        .with_markup(r#"<div data-dzi="/scan.dzi"></div>"#)
        .with_requests(&["https://tiles.test/other_files/5/0_0.jpg"]);

    let configs = TileSourceDetector::new(server).detect_all(&page).await;

    let bases: Vec<_> = configs.iter().map(|c| c.base_url()).collect();
    assert_eq!(bases, vec![BASE_URL, "https://tiles.test/other_files"]);
}

// =============================================================================
// Failure Modes
// =============================================================================

#[tokio::test]
async fn test_unreachable_descriptor_uses_default_geometry() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let page = StaticPage::new().with_markup(r##"<a href="#" data-dzi="/gone/page.dzi"></a>"##);

    let config = TileSourceDetector::new(server).detect(&page).await.unwrap();

    assert_eq!(config.base_url(), "https://tiles.test/gone/page_files");
    assert_eq!(config.tile_size(), 256);
    assert_eq!(config.format(), "jpg");
    assert_eq!(config.max_level(), None);
}

#[tokio::test]
async fn test_nothing_detected() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));

    let page = StaticPage::new();
    assert!(TileSourceDetector::new(Arc::clone(&server))
        .detect(&page)
        .await
        .is_none());

    let page = StaticPage::new()
        .with_state(serde_json::json!({"found": false}))
        .with_markup("<html><body><img src=\"/logo.png\"></body></html>")
        .with_requests(&["https://tiles.test/logo.png"]);
    assert!(TileSourceDetector::new(server).detect_all(&page).await.is_empty());
}
