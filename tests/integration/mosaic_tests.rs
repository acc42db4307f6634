//! Region analysis and stitching integration tests.
//!
//! Tests verify:
//! - Edge similarity separates unrelated tiles
//! - A continuous grid becomes one image of the full size
//! - Edge tiles thinner than the strip still join their neighbours
//! - Discontinuous columns become separate images
//! - Missing tiles leave black holes and are reported
//! - Existing tile directories can be stitched on their own

use image::Rgb;
use sha2::{Digest, Sha256};

use deepzoom_harvest::mosaic::{
    edge_similarity, AnalyzerConfig, MosaicAnalyzer, MosaicStitcher, StitchConfig,
};
use deepzoom_harvest::pipeline::stitch_tile_directory;
use deepzoom_harvest::tile::{TileCoordinate, TileRecord, TileStore};

use super::test_utils::{open_rgb, solid_tile, write_tile};

const GRAY: [u8; 3] = [128, 128, 128];
const RED: [u8; 3] = [220, 30, 30];
const BLUE: [u8; 3] = [30, 30, 220];

fn stitch_config() -> StitchConfig {
    StitchConfig {
        write_preview: false,
        ..StitchConfig::default()
    }
}

/// Write a `cols x rows` grid at `level` whose tile colors come from `color`.
fn write_grid(
    store: &TileStore,
    level: u32,
    cols: u32,
    rows: u32,
    color: impl Fn(u32, u32) -> [u8; 3],
) -> Vec<TileRecord> {
    let mut records = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            let coord = TileCoordinate::new(level, col, row);
            records.push(write_tile(store, coord, &solid_tile(256, 256, color(col, row))));
        }
    }
    records
}

// =============================================================================
// Edge Similarity
// =============================================================================

#[test]
fn test_identical_strips_are_fully_similar() {
    let strip = solid_tile(10, 256, GRAY);
    assert_eq!(edge_similarity(&strip, &strip), Some(1.0));
}

#[test]
fn test_black_and_white_are_discontinuous() {
    let black = solid_tile(10, 256, [0, 0, 0]);
    let white = solid_tile(10, 256, [255, 255, 255]);

    let similarity = edge_similarity(&black, &white).unwrap();
    assert!(similarity < 0.7, "similarity {}", similarity);
}

// =============================================================================
// Analysis and Stitching
// =============================================================================

#[test]
fn test_continuous_grid_is_one_image() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let records = write_grid(&store, 5, 2, 2, |_, _| GRAY);

    let regions = MosaicAnalyzer::default().analyze(&records);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), 4);

    let base = tmp.path().join("out.png");
    let outputs = MosaicStitcher::new(stitch_config()).stitch_all(&regions, &records, &base);
    assert_eq!(outputs.len(), 1);

    let output = outputs[0].as_ref().unwrap();
    assert_eq!(output.path, base);
    assert_eq!((output.width, output.height), (512, 512));
    assert_eq!((output.tile_width, output.tile_height), (256, 256));
    assert!(output.missing.is_empty());

    let image = open_rgb(&output.path);
    assert_eq!(image.dimensions(), (512, 512));
    assert_eq!(*image.get_pixel(400, 400), Rgb(GRAY));
}

#[test]
fn test_thin_last_row_stays_one_image() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let mut records = Vec::new();
    for (col, row) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let height = if row == 1 { 5 } else { 256 };
        let coord = TileCoordinate::new(5, col, row);
        records.push(write_tile(&store, coord, &solid_tile(256, height, GRAY)));
    }

    let regions = MosaicAnalyzer::default().analyze(&records);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), 4);
}

#[test]
fn test_discontinuous_columns_are_separate_images() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let records = write_grid(&store, 5, 2, 2, |col, _| if col == 0 { RED } else { BLUE });

    let regions = MosaicAnalyzer::default().analyze(&records);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].min_coord(), Some(TileCoordinate::new(5, 0, 0)));
    assert_eq!(regions[1].min_coord(), Some(TileCoordinate::new(5, 1, 0)));

    let base = tmp.path().join("out.png");
    let outputs: Vec<_> = MosaicStitcher::new(stitch_config())
        .stitch_all(&regions, &records, &base)
        .into_iter()
        .map(Result::unwrap)
        .collect();

    // One output per region
    assert_eq!(outputs.len(), regions.len());
    assert_eq!(outputs[0].path, tmp.path().join("out_1.png"));
    assert_eq!(outputs[1].path, tmp.path().join("out_2.png"));

    for (output, color) in outputs.iter().zip([RED, BLUE]) {
        assert_eq!((output.width, output.height), (256, 512));
        let image = open_rgb(&output.path);
        assert_eq!(*image.get_pixel(100, 300), Rgb(color));
    }
}

#[test]
fn test_single_image_mode_ignores_discontinuity() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let records = write_grid(&store, 5, 2, 2, |col, _| if col == 0 { RED } else { BLUE });

    let analyzer = MosaicAnalyzer::new(AnalyzerConfig {
        separate_images: false,
        ..AnalyzerConfig::default()
    });
    let regions = analyzer.analyze(&records);

    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), 4);
}

#[test]
fn test_missing_tile_leaves_black_hole() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let mut records = write_grid(&store, 5, 2, 2, |_, _| GRAY);

    let hole = TileCoordinate::new(5, 1, 1);
    let index = records.iter().position(|r| r.coord() == hole).unwrap();
    std::fs::remove_file(records[index].path()).unwrap();
    records[index] = TileRecord::pending(hole, "https://tiles.test/5/1_1.png", store.tile_path(hole, "png"))
        .complete_failure("HTTP 500");

    let regions = MosaicAnalyzer::default().analyze(&records);
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].len(), 3);

    let base = tmp.path().join("holey.png");
    let output = MosaicStitcher::new(stitch_config())
        .stitch(&regions[0], &records, &base)
        .unwrap();

    assert_eq!((output.width, output.height), (512, 512));
    assert_eq!(output.placed.len(), 3);
    assert_eq!(output.missing, vec![hole]);

    let image = open_rgb(&base);
    assert_eq!(*image.get_pixel(300, 300), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(100, 100), Rgb(GRAY));
}

#[test]
fn test_output_digest_matches_file() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let records = write_grid(&store, 5, 1, 1, |_, _| GRAY);

    let regions = MosaicAnalyzer::default().analyze(&records);
    let output = MosaicStitcher::new(stitch_config())
        .stitch(&regions[0], &records, &tmp.path().join("one.jpg"))
        .unwrap();

    let bytes = std::fs::read(&output.path).unwrap();
    assert_eq!(output.file_size, bytes.len() as u64);
    assert_eq!(output.sha256, hex::encode(Sha256::digest(&bytes)));
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_large_output_gets_preview() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = TileStore::new(tmp.path().join("tiles"));
    let records = write_grid(&store, 5, 3, 1, |_, _| GRAY);

    let config = StitchConfig {
        preview_max_side: 300,
        ..StitchConfig::default()
    };
    let regions = MosaicAnalyzer::default().analyze(&records);
    let output = MosaicStitcher::new(config)
        .stitch(&regions[0], &records, &tmp.path().join("wide.jpg"))
        .unwrap();

    let preview = output.preview_path.expect("preview written");
    let image = open_rgb(&preview);
    assert_eq!(image.dimensions(), (300, 100));
}

// =============================================================================
// Tile Directories
// =============================================================================

#[test]
fn test_stitch_directory_uses_highest_level() {
    let tmp = tempfile::TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let store = TileStore::new(&work);
    write_grid(&store, 3, 1, 1, |_, _| RED);
    write_grid(&store, 4, 2, 1, |_, _| GRAY);

    let base = tmp.path().join("dir.png");
    let summary =
        stitch_tile_directory(&work, &base, &AnalyzerConfig::default(), &stitch_config()).unwrap();

    assert_eq!(summary.regions.len(), 1);
    assert!(summary.region_errors.is_empty());
    assert_eq!(summary.outputs.len(), 1);
    assert_eq!((summary.outputs[0].width, summary.outputs[0].height), (512, 256));
}

#[test]
fn test_stitch_flat_directory() {
    let tmp = tempfile::TempDir::new().unwrap();
    let dir = tmp.path().join("flat");
    std::fs::create_dir_all(&dir).unwrap();
    for (col, row) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        solid_tile(256, 256, GRAY)
            .save(dir.join(format!("page_tile_{}_{}.png", col, row)))
            .unwrap();
    }

    let base = tmp.path().join("flat.png");
    let summary =
        stitch_tile_directory(&dir, &base, &AnalyzerConfig::default(), &stitch_config()).unwrap();

    assert_eq!(summary.outputs.len(), 1);
    assert_eq!((summary.outputs[0].width, summary.outputs[0].height), (512, 512));
}

#[test]
fn test_stitch_missing_directory_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let result = stitch_tile_directory(
        &tmp.path().join("absent"),
        &tmp.path().join("x.png"),
        &AnalyzerConfig::default(),
        &stitch_config(),
    );
    assert!(result.is_err());
}
