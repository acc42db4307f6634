use serde::{Deserialize, Serialize};

use crate::tile::TileCoordinate;

/// Direction in which two tiles touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrientation {
    /// `(c, r)` and `(c + 1, r)`: right strip against left strip
    Horizontal,
    /// `(c, r)` and `(c, r + 1)`: bottom strip against top strip
    Vertical,
}

/// Continuity score of two adjacent tiles. `a` always sorts before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjacencyEdge {
    pub a: TileCoordinate,
    pub b: TileCoordinate,
    pub orientation: EdgeOrientation,
    /// In `(0, 1]`; `1.0` means identical strips
    pub similarity: f64,
}

impl AdjacencyEdge {
    pub fn new(
        a: TileCoordinate,
        b: TileCoordinate,
        orientation: EdgeOrientation,
        similarity: f64,
    ) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            a,
            b,
            orientation,
            similarity,
        }
    }
}

/// Inclusive tile-index bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionBounds {
    pub min_col: u32,
    pub max_col: u32,
    pub min_row: u32,
    pub max_row: u32,
}

impl RegionBounds {
    pub fn cols(&self) -> u32 {
        self.max_col - self.min_col + 1
    }

    pub fn rows(&self) -> u32 {
        self.max_row - self.min_row + 1
    }

    pub fn contains(&self, coord: TileCoordinate) -> bool {
        (self.min_col..=self.max_col).contains(&coord.col)
            && (self.min_row..=self.max_row).contains(&coord.row)
    }

    /// Every cell of the box at `level`, row-major.
    pub fn cells(&self, level: u32) -> Vec<TileCoordinate> {
        let mut cells = Vec::with_capacity(self.cols() as usize * self.rows() as usize);
        for row in self.min_row..=self.max_row {
            for col in self.min_col..=self.max_col {
                cells.push(TileCoordinate::new(level, col, row));
            }
        }
        cells
    }
}

/// A set of tiles judged to belong to one physical image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MosaicRegion {
    pub index: usize,
    pub level: u32,
    /// Sorted, row-major
    pub members: Vec<TileCoordinate>,
    pub bounds: RegionBounds,
}

impl MosaicRegion {
    /// Build a region from its members. Returns `None` for an empty set.
    ///
    /// All members are expected to share one level.
    pub fn from_members(index: usize, mut members: Vec<TileCoordinate>) -> Option<Self> {
        members.sort();
        members.dedup();
        let first = *members.first()?;

        let mut bounds = RegionBounds {
            min_col: first.col,
            max_col: first.col,
            min_row: first.row,
            max_row: first.row,
        };
        for m in &members {
            bounds.min_col = bounds.min_col.min(m.col);
            bounds.max_col = bounds.max_col.max(m.col);
            bounds.min_row = bounds.min_row.min(m.row);
            bounds.max_row = bounds.max_row.max(m.row);
        }

        Some(Self {
            index,
            level: first.level,
            members,
            bounds,
        })
    }

    /// Smallest member; regions are ordered by it.
    pub fn min_coord(&self) -> Option<TileCoordinate> {
        self.members.first().copied()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
