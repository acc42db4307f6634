//! Continuity analysis: which tiles belong to the same physical image.
//!
//! Adjacent tiles of one photograph agree along their shared border; tiles of
//! two different objects placed side by side usually do not. For every pair of
//! neighbours the analyzer compares the facing edge strips:
//!
//! ```text
//!   tile (c, r)        tile (c+1, r)
//! ┌────────────┬──┐  ┌──┬────────────┐
//! │            │R │  │L │            │     mse = mean((R - L)^2)
//! │            │  │  │  │            │     sim = 1 / (1 + mse / 255)
//! └────────────┴──┘  └──┴────────────┘
//!                ◄────►
//!             strip_width
//! ```
//!
//! Edges with `sim >= threshold` join tiles into a graph whose connected
//! components are the regions.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use image::{imageops, RgbImage};
use tracing::{debug, warn};

use super::region::{AdjacencyEdge, EdgeOrientation, MosaicRegion};
use crate::tile::{TileCoordinate, TileRecord};

/// Default minimum similarity for two tiles to be continuous.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Default edge strip width in pixels.
pub const DEFAULT_STRIP_WIDTH: u32 = 10;

/// Analyzer tuning.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub threshold: f64,
    /// Clamped to the thinner tile of each pair
    pub strip_width: u32,
    /// When false, every level becomes a single region
    pub separate_images: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            strip_width: DEFAULT_STRIP_WIDTH,
            separate_images: true,
        }
    }
}

/// The four border strips of one decoded tile.
struct TileStrips {
    top: RgbImage,
    bottom: RgbImage,
    left: RgbImage,
    right: RgbImage,
}

impl TileStrips {
    fn from_tile(tile: &RgbImage, strip_width: u32) -> Option<Self> {
        let (w, h) = tile.dimensions();
        if w == 0 || h == 0 {
            return None;
        }
        let sw = strip_width.max(1).min(w);
        let sh = strip_width.max(1).min(h);

        Some(Self {
            top: imageops::crop_imm(tile, 0, 0, w, sh).to_image(),
            bottom: imageops::crop_imm(tile, 0, h - sh, w, sh).to_image(),
            left: imageops::crop_imm(tile, 0, 0, sw, h).to_image(),
            right: imageops::crop_imm(tile, w - sw, 0, sw, h).to_image(),
        })
    }
}

/// Trim two facing strips to the same depth across the shared border.
///
/// `near` lies before the border (right or bottom strip), `far` after it
/// (left or top strip). Only the pixels closest to the border are kept.
fn facing_strips(near: &RgbImage, far: &RgbImage, orientation: EdgeOrientation) -> (RgbImage, RgbImage) {
    let (nw, nh) = near.dimensions();
    let (fw, fh) = far.dimensions();
    match orientation {
        EdgeOrientation::Horizontal => {
            let depth = nw.min(fw);
            (
                imageops::crop_imm(near, nw - depth, 0, depth, nh).to_image(),
                imageops::crop_imm(far, 0, 0, depth, fh).to_image(),
            )
        }
        EdgeOrientation::Vertical => {
            let depth = nh.min(fh);
            (
                imageops::crop_imm(near, 0, nh - depth, nw, depth).to_image(),
                imageops::crop_imm(far, 0, 0, fw, depth).to_image(),
            )
        }
    }
}

/// Similarity of facing strips across `orientation`.
fn border_similarity(near: &RgbImage, far: &RgbImage, orientation: EdgeOrientation) -> Option<f64> {
    let (near, far) = facing_strips(near, far, orientation);
    edge_similarity(&near, &far)
}

/// Similarity of two strips in `(0, 1]`.
///
/// `None` when the strips differ in shape or are empty.
pub fn edge_similarity(a: &RgbImage, b: &RgbImage) -> Option<f64> {
    if a.dimensions() != b.dimensions() || a.as_raw().is_empty() {
        return None;
    }

    let sum: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum();
    let mse = sum / a.as_raw().len() as f64;

    Some(1.0 / (1.0 + mse / 255.0))
}

/// Groups successfully downloaded tiles into image regions.
#[derive(Debug, Clone, Default)]
pub struct MosaicAnalyzer {
    config: AnalyzerConfig,
}

impl MosaicAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Decode every successful tile once. Undecodable tiles are left out of
    /// the map but still returned in the coordinate list.
    fn load_strips(
        &self,
        records: &[TileRecord],
    ) -> (Vec<TileCoordinate>, HashMap<TileCoordinate, TileStrips>) {
        let mut coords = Vec::new();
        let mut strips = HashMap::new();

        for record in records.iter().filter(|r| r.is_success()) {
            coords.push(record.coord());
            match image::open(record.path()) {
                Ok(img) => {
                    if let Some(s) = TileStrips::from_tile(&img.to_rgb8(), self.config.strip_width) {
                        strips.insert(record.coord(), s);
                    }
                }
                Err(e) => {
                    warn!(coord = %record.coord(), path = %record.path().display(), error = %e,
                        "Undecodable tile, treating as its own region");
                }
            }
        }

        coords.sort();
        coords.dedup();
        (coords, strips)
    }

    fn compute_edges(&self, strips: &HashMap<TileCoordinate, TileStrips>) -> Vec<AdjacencyEdge> {
        let mut coords: Vec<_> = strips.keys().copied().collect();
        coords.sort();

        let mut edges = Vec::new();
        for coord in coords {
            let Some(current) = strips.get(&coord) else {
                continue;
            };

            let right = coord.right();
            if let Some(neighbour) = strips.get(&right) {
                if let Some(sim) =
                    border_similarity(&current.right, &neighbour.left, EdgeOrientation::Horizontal)
                {
                    edges.push(AdjacencyEdge::new(coord, right, EdgeOrientation::Horizontal, sim));
                }
            }

            let below = coord.below();
            if let Some(neighbour) = strips.get(&below) {
                if let Some(sim) =
                    border_similarity(&current.bottom, &neighbour.top, EdgeOrientation::Vertical)
                {
                    edges.push(AdjacencyEdge::new(coord, below, EdgeOrientation::Vertical, sim));
                }
            }
        }

        edges
    }

    /// Similarity of every adjacent pair of successful tiles.
    pub fn edges(&self, records: &[TileRecord]) -> Vec<AdjacencyEdge> {
        let (_, strips) = self.load_strips(records);
        self.compute_edges(&strips)
    }

    /// Partition successful tiles into regions, ordered by minimum coordinate.
    pub fn analyze(&self, records: &[TileRecord]) -> Vec<MosaicRegion> {
        if !self.config.separate_images {
            return self.single_region_per_level(records);
        }

        let (coords, strips) = self.load_strips(records);
        let edges = self.compute_edges(&strips);

        let mut adjacency: HashMap<TileCoordinate, Vec<TileCoordinate>> = HashMap::new();
        let mut continuous = 0usize;
        for edge in edges.iter().filter(|e| e.similarity >= self.config.threshold) {
            adjacency.entry(edge.a).or_default().push(edge.b);
            adjacency.entry(edge.b).or_default().push(edge.a);
            continuous += 1;
        }

        let mut visited = HashSet::new();
        let mut components = Vec::new();
        for &start in &coords {
            if !visited.insert(start) {
                continue;
            }

            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                for &next in adjacency.get(&current).into_iter().flatten() {
                    if visited.insert(next) {
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }

        let regions = index_regions(components);
        debug!(
            tiles = coords.len(),
            edges = edges.len(),
            continuous,
            regions = regions.len(),
            "Continuity analysis complete"
        );
        regions
    }

    fn single_region_per_level(&self, records: &[TileRecord]) -> Vec<MosaicRegion> {
        let mut by_level: BTreeMap<u32, Vec<TileCoordinate>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.is_success()) {
            by_level
                .entry(record.coord().level)
                .or_default()
                .push(record.coord());
        }
        index_regions(by_level.into_values().collect())
    }
}

/// Build regions and number them by their smallest member.
fn index_regions(components: Vec<Vec<TileCoordinate>>) -> Vec<MosaicRegion> {
    let mut regions: Vec<MosaicRegion> = components
        .into_iter()
        .filter_map(|members| MosaicRegion::from_members(0, members))
        .collect();

    regions.sort_by_key(|r| r.min_coord());
    for (index, region) in regions.iter_mut().enumerate() {
        region.index = index;
    }
    regions
}
