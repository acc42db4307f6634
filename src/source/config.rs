use serde::{Deserialize, Serialize};

use super::dzi::{calculate_max_dzi_level, dzi_level_dimensions, dzi_tile_count};
use crate::tile::{GridSize, TileCoordinate};

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Default tile file extension.
pub const DEFAULT_TILE_FORMAT: &str = "jpg";

/// How a tile source was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Read from the viewer's runtime state
    LiveState,
    /// Found in the page source
    StaticMarkup,
    /// Inferred from observed tile requests
    Traffic,
}

/// Everything needed to address tiles of one remote pyramid.
///
/// Built once by detection and never mutated afterwards; builder methods
/// consume and return the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSourceConfig {
    base_url: String,
    tile_size: u32,
    overlap: u32,
    format: String,
    width: Option<u32>,
    height: Option<u32>,
    max_level: Option<u32>,
    strategy: DetectionStrategy,
}

impl TileSourceConfig {
    /// Create a config with default geometry.
    ///
    /// Trailing slashes are stripped from `base_url`.
    pub fn new(base_url: impl Into<String>, strategy: DetectionStrategy) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            overlap: 0,
            format: DEFAULT_TILE_FORMAT.to_string(),
            width: None,
            height: None,
            max_level: None,
            strategy,
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        if tile_size > 0 {
            self.tile_size = tile_size;
        }
        self
    }

    pub fn with_overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    /// Set the tile extension. A leading dot is ignored; `jpeg` stays `jpeg`
    /// because servers address files by the literal extension.
    pub fn with_format(mut self, format: &str) -> Self {
        let format = format.trim().trim_start_matches('.');
        if !format.is_empty() {
            self.format = format.to_ascii_lowercase();
        }
        self
    }

    /// Set the full-resolution pixel size. The max level is derived from it.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        if width > 0 && height > 0 {
            self.width = Some(width);
            self.height = Some(height);
            self.max_level = Some(calculate_max_dzi_level(width, height));
        }
        self
    }

    pub fn with_max_level(mut self, max_level: u32) -> Self {
        self.max_level = Some(max_level);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn max_level(&self) -> Option<u32> {
        self.max_level
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    /// Key used to recognise the same source found by several strategies.
    pub fn normalized_base(&self) -> String {
        self.base_url.to_ascii_lowercase()
    }

    /// URL of one tile.
    ///
    /// A base containing `{level}`, `{col}`, `{row}` or `{format}` is treated
    /// as a template; anything else uses the deep-zoom layout
    /// `{base}/{level}/{col}_{row}.{format}`.
    pub fn tile_url(&self, coord: TileCoordinate) -> String {
        let templated = ["{level}", "{col}", "{row}", "{format}"]
            .iter()
            .any(|p| self.base_url.contains(p));

        if templated {
            self.base_url
                .replace("{level}", &coord.level.to_string())
                .replace("{col}", &coord.col.to_string())
                .replace("{row}", &coord.row.to_string())
                .replace("{format}", &self.format)
        } else {
            format!(
                "{}/{}/{}_{}.{}",
                self.base_url, coord.level, coord.col, coord.row, self.format
            )
        }
    }

    /// Grid implied by known dimensions at `level`, or `None` when the
    /// dimensions are unknown or the level is out of range.
    pub fn level_grid(&self, level: u32) -> Option<GridSize> {
        let (width, height, max_level) = (self.width?, self.height?, self.max_level?);
        if level > max_level {
            return None;
        }

        let (w, h) = dzi_level_dimensions(width, height, level, max_level);
        let (cols, rows) = dzi_tile_count(w, h, self.tile_size);
        Some(GridSize::new(cols, rows))
    }
}
