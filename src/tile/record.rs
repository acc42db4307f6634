use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::TileCoordinate;

/// Lifecycle state of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    Pending,
    Success,
    Failed,
}

/// Outcome of fetching one tile.
///
/// Records are created [`Pending`](TileStatus::Pending) when enqueued and
/// consumed by exactly one of [`complete_success`](Self::complete_success) or
/// [`complete_failure`](Self::complete_failure). A terminal record has no
/// way back: completing it again returns it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRecord {
    coord: TileCoordinate,
    url: String,
    path: PathBuf,
    size_bytes: u64,
    status: TileStatus,
    error: Option<String>,
}

impl TileRecord {
    pub fn pending(coord: TileCoordinate, url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            coord,
            url: url.into(),
            path: path.into(),
            size_bytes: 0,
            status: TileStatus::Pending,
            error: None,
        }
    }

    /// A tile already present on disk, e.g. read back from a tile directory.
    pub fn existing(coord: TileCoordinate, path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self::pending(coord, String::new(), path).complete_success(size_bytes)
    }

    pub fn complete_success(self, size_bytes: u64) -> Self {
        if self.status != TileStatus::Pending {
            return self;
        }
        Self {
            size_bytes,
            status: TileStatus::Success,
            error: None,
            ..self
        }
    }

    pub fn complete_failure(self, error: impl Into<String>) -> Self {
        if self.status != TileStatus::Pending {
            return self;
        }
        Self {
            size_bytes: 0,
            status: TileStatus::Failed,
            error: Some(error.into()),
            ..self
        }
    }

    pub fn coord(&self) -> TileCoordinate {
        self.coord
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn status(&self) -> TileStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_success(&self) -> bool {
        self.status == TileStatus::Success
    }

    pub fn is_terminal(&self) -> bool {
        self.status != TileStatus::Pending
    }
}
