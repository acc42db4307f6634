//! Level and grid probing integration tests.
//!
//! Tests verify:
//! - Highest level discovery by binary search and corner confirmation
//! - Grid extent along both axes, with the per-axis cap
//! - Known level bounds from descriptors
//! - Inconclusive pyramids

use std::sync::Arc;
use std::time::Duration;

use deepzoom_harvest::source::{DetectionStrategy, ProbeConfig, TileSetProbe, TileSourceConfig};
use deepzoom_harvest::tile::{GridSize, TileCoordinate};

use super::test_utils::SyntheticTileServer;

fn probe(server: &Arc<SyntheticTileServer>) -> TileSetProbe<SyntheticTileServer> {
    TileSetProbe::new(Arc::clone(server))
}

#[tokio::test]
async fn test_finds_highest_level_and_grid() {
    let server = Arc::new(SyntheticTileServer::new(7, 5, 3));
    let source = server.source();
    let probe = probe(&server);

    let level = probe.find_highest_level(&source).await;
    assert_eq!(level, Some(7));

    let grid = probe.estimate_grid(&source, 7).await;
    assert_eq!(grid, GridSize::new(5, 3));
    assert_eq!(grid.tile_count(), 15);
}

#[tokio::test]
async fn test_contiguous_levels_probe_to_top() {
    for max_level in [1, 4, 7, 12] {
        let server = Arc::new(SyntheticTileServer::new(max_level, 8, 8));
        let level = probe(&server).find_highest_level(&server.source()).await;
        assert_eq!(level, Some(max_level), "pyramid with top level {}", max_level);
    }
}

#[tokio::test]
async fn test_search_is_logarithmic() {
    let server = Arc::new(SyntheticTileServer::new(7, 4, 4));
    probe(&server).find_highest_level(&server.source()).await;

    // ~log2(21) corner probes plus one 3-tile confirmation
    assert!(server.head_count() <= 10, "issued {} HEADs", server.head_count());
    assert_eq!(server.get_count(), 0);
}

#[tokio::test]
async fn test_confirmation_tolerates_one_missing_corner() {
    let server = Arc::new(SyntheticTileServer::new(6, 4, 4).with_missing(TileCoordinate::new(6, 1, 0)));
    let level = probe(&server).find_highest_level(&server.source()).await;
    assert_eq!(level, Some(6));
}

#[tokio::test]
async fn test_unconfirmed_level_steps_down() {
    // Top level has only its corner tile; level 5 has a 2x2 grid
    let server = Arc::new(
        SyntheticTileServer::new(6, 4, 4)
            .with_missing(TileCoordinate::new(6, 1, 0))
            .with_missing(TileCoordinate::new(6, 0, 1)),
    );
    let level = probe(&server).find_highest_level(&server.source()).await;
    assert_eq!(level, Some(5));
}

#[tokio::test]
async fn test_known_max_level_bounds_the_search() {
    let server = Arc::new(SyntheticTileServer::new(10, 32, 32));
    let source = server.source().with_max_level(6);

    let level = probe(&server).find_highest_level(&source).await;
    assert_eq!(level, Some(6));
}

#[tokio::test]
async fn test_single_tile_pyramid_is_inconclusive() {
    let server = Arc::new(SyntheticTileServer::new(0, 1, 1));
    let level = probe(&server).find_highest_level(&server.source()).await;
    assert_eq!(level, None);
}

#[tokio::test]
async fn test_unknown_base_is_inconclusive() {
    let server = Arc::new(SyntheticTileServer::new(3, 2, 2));
    let source = TileSourceConfig::new("https://tiles.test/nothing_files", DetectionStrategy::Traffic);

    let level = probe(&server).find_highest_level(&source).await;
    assert_eq!(level, None);
    assert_eq!(server.get_count(), 0);
}

#[tokio::test]
async fn test_grid_probe_is_capped() {
    let server = Arc::new(SyntheticTileServer::new(3, 80, 2));
    let config = ProbeConfig {
        timeout: Duration::from_secs(1),
        max_level_bound: 20,
        max_probe_tiles: 50,
    };
    let probe = TileSetProbe::with_config(Arc::clone(&server), config);

    let grid = probe.estimate_grid(&server.source(), 3).await;
    assert_eq!(grid, GridSize::new(50, 2));
}

#[tokio::test]
async fn test_grid_without_corner_is_empty() {
    let server = Arc::new(SyntheticTileServer::new(3, 4, 4).with_missing(TileCoordinate::new(3, 0, 0)));
    let grid = probe(&server).estimate_grid(&server.source(), 3).await;
    assert!(grid.is_empty());
}
