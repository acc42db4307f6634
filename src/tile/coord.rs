use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of one tile in a deep-zoom pyramid.
///
/// Ordering is row-major within a level: `(level, row, col)`. Sorting a set
/// of coordinates therefore yields the order tiles are pasted and reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    pub level: u32,
    pub col: u32,
    pub row: u32,
}

impl TileCoordinate {
    pub fn new(level: u32, col: u32, row: u32) -> Self {
        Self { level, col, row }
    }

    /// Neighbour to the right (`col + 1`).
    pub fn right(&self) -> Self {
        Self::new(self.level, self.col + 1, self.row)
    }

    /// Neighbour below (`row + 1`).
    pub fn below(&self) -> Self {
        Self::new(self.level, self.col, self.row + 1)
    }
}

impl Ord for TileCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.level, self.row, self.col).cmp(&(other.level, other.row, other.col))
    }
}

impl PartialOrd for TileCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/{}_{}", self.level, self.col, self.row)
    }
}

/// Extent of a dense tile grid at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub cols: u32,
    pub rows: u32,
}

impl GridSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }

    /// Number of tiles in the grid.
    pub fn tile_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.tile_count() == 0
    }

    /// Every coordinate of the grid at `level`, row-major.
    pub fn coordinates(&self, level: u32) -> Vec<TileCoordinate> {
        let mut coords = Vec::with_capacity(self.tile_count());
        for row in 0..self.rows {
            for col in 0..self.cols {
                coords.push(TileCoordinate::new(level, col, row));
            }
        }
        coords
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}
