//! Zoom-level and grid discovery by existence probing.
//!
//! Servers rarely advertise their pyramid geometry, but they do answer HEAD
//! requests for tiles. Level discovery binary-searches the corner tile
//! `(level, 0, 0)` and then confirms the hit with a 2-of-3 corner test,
//! stepping down while confirmation fails:
//!
//! ```text
//! level:   0   1   2   3   4   5   6   7 | 8 ... L_max
//! (l,0,0): ✓   ✓   ✓   ✓   ✓   ✓   ✓   ✓ | ✗        binary search -> 7
//! confirm: (7,0,0) (7,1,0) (7,0,1)  >= 2 exist     -> 7
//! ```
//!
//! Grid extent is probed independently along row 0 and column 0.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::config::TileSourceConfig;
use crate::io::HttpClient;
use crate::tile::{GridSize, TileCoordinate};

/// Default timeout per existence probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper level bound when the source does not know its max level.
pub const DEFAULT_MAX_LEVEL_BOUND: u32 = 20;

/// Default cap on tiles probed along one axis.
pub const DEFAULT_MAX_PROBE_TILES: u32 = 50;

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Timeout of each HEAD request
    pub timeout: Duration,
    /// Search bound for sources without a known max level
    pub max_level_bound: u32,
    /// Maximum tiles probed along row 0 and along column 0
    pub max_probe_tiles: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            max_level_bound: DEFAULT_MAX_LEVEL_BOUND,
            max_probe_tiles: DEFAULT_MAX_PROBE_TILES,
        }
    }
}

/// Discovers the highest usable level and the grid extent of a tile source.
pub struct TileSetProbe<C: HttpClient> {
    client: Arc<C>,
    config: ProbeConfig,
}

impl<C: HttpClient> TileSetProbe<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self::with_config(client, ProbeConfig::default())
    }

    pub fn with_config(client: Arc<C>, config: ProbeConfig) -> Self {
        Self { client, config }
    }

    /// Whether a tile exists. Any error, including timeouts, counts as absent.
    async fn exists(&self, source: &TileSourceConfig, coord: TileCoordinate) -> bool {
        let url = source.tile_url(coord);
        let result = self.client.head(&url, self.config.timeout).await;
        trace!(url = %url, exists = result.is_ok(), "Probe");
        result.is_ok()
    }

    /// At least two of `(0,0)`, `(1,0)`, `(0,1)` exist at `level`.
    async fn confirm_level(&self, source: &TileSourceConfig, level: u32) -> bool {
        let (a, b, c) = tokio::join!(
            self.exists(source, TileCoordinate::new(level, 0, 0)),
            self.exists(source, TileCoordinate::new(level, 1, 0)),
            self.exists(source, TileCoordinate::new(level, 0, 1)),
        );
        [a, b, c].into_iter().filter(|&hit| hit).count() >= 2
    }

    /// Highest confirmed level, or `None` when no level passes confirmation.
    pub async fn find_highest_level(&self, source: &TileSourceConfig) -> Option<u32> {
        let upper = source.max_level().unwrap_or(self.config.max_level_bound);

        // Highest level whose corner tile exists, assuming levels are contiguous
        let mut lo = 0u32;
        let mut hi = upper;
        let mut candidate = None;
        loop {
            let mid = lo + (hi - lo) / 2;
            if self.exists(source, TileCoordinate::new(mid, 0, 0)).await {
                candidate = Some(mid);
                if mid == hi {
                    break;
                }
                lo = mid + 1;
            } else {
                if mid == lo {
                    break;
                }
                hi = mid - 1;
            }
        }

        let mut level = candidate?;
        debug!(base = source.base_url(), level, "Corner search candidate");

        loop {
            if self.confirm_level(source, level).await {
                debug!(base = source.base_url(), level, "Level confirmed");
                return Some(level);
            }
            if level == 0 {
                debug!(base = source.base_url(), "No level confirmed");
                return None;
            }
            level -= 1;
        }
    }

    /// Count consecutive existing tiles starting at `(0,0)` along one axis.
    async fn probe_axis(&self, source: &TileSourceConfig, level: u32, along_row: bool) -> u32 {
        let mut count = 0;
        while count < self.config.max_probe_tiles {
            let coord = if along_row {
                TileCoordinate::new(level, count, 0)
            } else {
                TileCoordinate::new(level, 0, count)
            };
            if !self.exists(source, coord).await {
                break;
            }
            count += 1;
        }
        count
    }

    /// Grid extent at `level`, probing row 0 and column 0 independently.
    ///
    /// Each axis is capped at the configured maximum. A missing corner tile
    /// yields an empty grid.
    pub async fn estimate_grid(&self, source: &TileSourceConfig, level: u32) -> GridSize {
        let (cols, rows) = tokio::join!(
            self.probe_axis(source, level, true),
            self.probe_axis(source, level, false),
        );

        let grid = GridSize::new(cols, rows);
        debug!(base = source.base_url(), level, grid = %grid, "Grid estimated");
        grid
    }
}
