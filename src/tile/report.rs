use serde::{Deserialize, Serialize};

use super::{GridSize, TileRecord, TileStatus};

/// Outcome of downloading one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadReport {
    pub level: u32,
    pub grid: GridSize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Submission stopped early; unsubmitted tiles are recorded as failed
    pub cancelled: bool,
    pub records: Vec<TileRecord>,
}

impl DownloadReport {
    /// Build a report from terminal records, sorted by coordinate.
    pub fn from_records(level: u32, grid: GridSize, mut records: Vec<TileRecord>, cancelled: bool) -> Self {
        records.sort_by_key(|r| r.coord());
        let succeeded = records.iter().filter(|r| r.is_success()).count();
        let failed = records
            .iter()
            .filter(|r| r.status() == TileStatus::Failed)
            .count();

        Self {
            level,
            grid,
            attempted: records.len(),
            succeeded,
            failed,
            cancelled,
            records,
        }
    }

    /// Fraction of attempted tiles that succeeded; `0.0` for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }

    pub fn failed_records(&self) -> impl Iterator<Item = &TileRecord> {
        self.records
            .iter()
            .filter(|r| r.status() == TileStatus::Failed)
    }
}
