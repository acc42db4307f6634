//! Raster reconstruction of mosaic regions.
//!
//! Each region is composited onto a black canvas covering its bounding box:
//!
//! ```text
//!   min_col           max_col
//!   ┌──────┬──────┬──────┐ min_row
//!   │ tile │ tile │ ░░░░ │   ░ = bounding-box cell without a tile,
//!   ├──────┼──────┼──────┤       left black and listed as missing
//!   │ tile │ tile │ tile │
//!   └──────┴──────┴──────┘ max_row
//!   canvas = (cols * w, rows * h), (w, h) = majority tile size
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::encoder::{MosaicEncoder, DEFAULT_OUTPUT_QUALITY, DEFAULT_PREVIEW_QUALITY};
use super::region::MosaicRegion;
use crate::error::StitchError;
use crate::tile::{TileCoordinate, TileRecord};

/// Default longest side of a preview, in pixels.
pub const DEFAULT_PREVIEW_MAX_SIDE: u32 = 1200;

/// Stitcher tuning.
#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub output_quality: u8,
    pub preview_quality: u8,
    /// Outputs whose longest side exceeds this also get a preview
    pub preview_max_side: u32,
    pub write_preview: bool,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            output_quality: DEFAULT_OUTPUT_QUALITY,
            preview_quality: DEFAULT_PREVIEW_QUALITY,
            preview_max_side: DEFAULT_PREVIEW_MAX_SIDE,
            write_preview: true,
        }
    }
}

/// A composited region held in memory.
#[derive(Debug, Clone)]
pub struct MosaicImage {
    pub region_index: usize,
    pub image: RgbImage,
    pub tile_width: u32,
    pub tile_height: u32,
    pub placed: Vec<TileCoordinate>,
    pub missing: Vec<TileCoordinate>,
}

/// Summary of one written output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedOutput {
    pub region_index: usize,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub placed: Vec<TileCoordinate>,
    pub missing: Vec<TileCoordinate>,
    pub path: PathBuf,
    pub preview_path: Option<PathBuf>,
    pub file_size: u64,
    pub sha256: String,
}

impl fmt::Display for StitchedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}, {} tiles, {} missing)",
            self.path.display(),
            self.width,
            self.height,
            self.placed.len(),
            self.missing.len()
        )
    }
}

// =============================================================================
// Naming
// =============================================================================

fn split_base(base: &Path) -> (String, String) {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "jpg".to_string());
    (stem, ext)
}

/// Output path of region `index` (0-based) out of `count`.
///
/// One region writes `base` itself; several write `{stem}_{index + 1}.{ext}`.
/// A base without extension gets `.jpg`.
pub fn region_output_path(base: &Path, index: usize, count: usize) -> PathBuf {
    let (stem, ext) = split_base(base);
    let name = if count <= 1 {
        format!("{}.{}", stem, ext)
    } else {
        format!("{}_{}.{}", stem, index + 1, ext)
    };
    base.with_file_name(name)
}

/// Preview sibling of an output: `{stem}_preview.{ext}`.
pub fn preview_path(output: &Path) -> PathBuf {
    let (stem, ext) = split_base(output);
    output.with_file_name(format!("{}_preview.{}", stem, ext))
}

/// Most frequent tile size among `paths`, ties broken toward the larger area.
///
/// Unreadable files are skipped; `None` when nothing could be read.
pub fn majority_tile_size<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Option<(u32, u32)> {
    let mut counts: HashMap<(u32, u32), usize> = HashMap::new();
    for path in paths {
        if let Ok(dims) = image::image_dimensions(path) {
            *counts.entry(dims).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .max_by_key(|&((w, h), count)| (count, w as u64 * h as u64, w))
        .map(|(dims, _)| dims)
}

// =============================================================================
// Stitcher
// =============================================================================

/// Composites regions into rasters and writes them.
#[derive(Debug, Clone, Default)]
pub struct MosaicStitcher {
    config: StitchConfig,
    encoder: MosaicEncoder,
}

impl MosaicStitcher {
    pub fn new(config: StitchConfig) -> Self {
        Self {
            config,
            encoder: MosaicEncoder::new(),
        }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Composite one region in memory.
    pub fn compose(&self, region: &MosaicRegion, records: &[TileRecord]) -> Result<MosaicImage, StitchError> {
        let by_coord: HashMap<TileCoordinate, &TileRecord> = records
            .iter()
            .filter(|r| r.is_success())
            .map(|r| (r.coord(), r))
            .collect();

        let member_paths: HashMap<TileCoordinate, &Path> = region
            .members
            .iter()
            .filter_map(|m| by_coord.get(m).map(|r| (*m, r.path())))
            .collect();

        let (tile_w, tile_h) = majority_tile_size(member_paths.values().copied())
            .ok_or(StitchError::NoPlaceableTiles {
                region: region.index,
            })?;

        let bounds = region.bounds;
        let (canvas_w, canvas_h) = bounds
            .cols()
            .checked_mul(tile_w)
            .zip(bounds.rows().checked_mul(tile_h))
            .ok_or_else(|| StitchError::Encode {
                message: format!("Region {} is too large to compose", region.index),
            })?;

        let mut canvas = RgbImage::new(canvas_w, canvas_h);
        let mut placed = Vec::new();
        let mut missing = Vec::new();

        for cell in bounds.cells(region.level) {
            let Some(path) = member_paths.get(&cell) else {
                missing.push(cell);
                continue;
            };

            let tile = match image::open(path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    warn!(coord = %cell, path = %path.display(), error = %e, "Could not load tile");
                    missing.push(cell);
                    continue;
                }
            };

            if tile.dimensions() != (tile_w, tile_h) {
                debug!(
                    coord = %cell,
                    width = tile.width(),
                    height = tile.height(),
                    expected_width = tile_w,
                    expected_height = tile_h,
                    "Tile size mismatch"
                );
            }

            let x = (cell.col - bounds.min_col) as i64 * tile_w as i64;
            let y = (cell.row - bounds.min_row) as i64 * tile_h as i64;
            imageops::replace(&mut canvas, &tile, x, y);
            placed.push(cell);
        }

        if placed.is_empty() {
            return Err(StitchError::NoPlaceableTiles {
                region: region.index,
            });
        }

        Ok(MosaicImage {
            region_index: region.index,
            image: canvas,
            tile_width: tile_w,
            tile_height: tile_h,
            placed,
            missing,
        })
    }

    /// Composite one region and write it (plus preview) to `path`.
    pub fn stitch(
        &self,
        region: &MosaicRegion,
        records: &[TileRecord],
        path: &Path,
    ) -> Result<StitchedOutput, StitchError> {
        let mosaic = self.compose(region, records)?;
        let (width, height) = mosaic.image.dimensions();

        let encoded = self
            .encoder
            .write(&mosaic.image, path, self.config.output_quality)?;

        let preview_path = if self.config.write_preview && width.max(height) > self.config.preview_max_side {
            self.write_preview(&mosaic.image, path)
        } else {
            None
        };

        info!(
            region = region.index,
            width,
            height,
            placed = mosaic.placed.len(),
            missing = mosaic.missing.len(),
            path = %path.display(),
            "Stitched region"
        );

        Ok(StitchedOutput {
            region_index: region.index,
            width,
            height,
            tile_width: mosaic.tile_width,
            tile_height: mosaic.tile_height,
            placed: mosaic.placed,
            missing: mosaic.missing,
            path: path.to_path_buf(),
            preview_path,
            file_size: encoded.len() as u64,
            sha256: hex::encode(Sha256::digest(&encoded)),
        })
    }

    /// Write a downscaled copy. Failures only cost the preview.
    fn write_preview(&self, image: &RgbImage, output: &Path) -> Option<PathBuf> {
        let (w, h) = image.dimensions();
        let scale = self.config.preview_max_side as f64 / w.max(h) as f64;
        let pw = ((w as f64 * scale).round() as u32).max(1);
        let ph = ((h as f64 * scale).round() as u32).max(1);

        let preview = imageops::resize(image, pw, ph, FilterType::Lanczos3);
        let path = preview_path(output);

        match self.encoder.write(&preview, &path, self.config.preview_quality) {
            Ok(_) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Preview write failed");
                None
            }
        }
    }

    /// Stitch every region. One region failing does not stop the others.
    pub fn stitch_all(
        &self,
        regions: &[MosaicRegion],
        records: &[TileRecord],
        base: &Path,
    ) -> Vec<Result<StitchedOutput, StitchError>> {
        regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                let path = region_output_path(base, i, regions.len());
                let result = self.stitch(region, records, &path);
                if let Err(e) = &result {
                    warn!(region = region.index, error = %e, "Region stitch failed");
                }
                result
            })
            .collect()
    }
}
