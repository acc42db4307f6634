//! End-to-end acquisition and reconstruction.
//!
//! # State machine
//!
//! ```text
//!  Idle ──► Detecting ──► Probing ──► Downloading ──► Analyzing ──► Stitching ──► Done
//!              │           │  ▲  │        │                            │
//!              │           │  └──┘        │                            │
//!              │           │ (skip)       │                            │
//!              ▼           └──────────────┼────────────► Done          │
//!            Failed ◄─────────────────────┘                            │
//!                          ▲                                           │
//!                          └────────────── next source ◄───────────────┘
//! ```
//!
//! `Failed` is reached when no tile source is detected or when a source
//! yields zero tiles. A source whose level or grid cannot be probed is
//! skipped and recorded in the report.
//!
//! # Artifacts
//!
//! With one source, tiles go to `{work_dir}/level_N/` and images to the output
//! base. With several, source `s` (1-based) uses `{work_dir}/source_{s}/` and
//! `{stem}_s{s}.{ext}`. The JSON report is always `{stem}_report.json` next to
//! the output base.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StitchError, TileDownloadError};
use crate::io::{HttpClient, RenderingContext};
use crate::mosaic::{
    AnalyzerConfig, MosaicAnalyzer, MosaicRegion, MosaicStitcher, StitchConfig, StitchedOutput,
};
use crate::source::{
    ProbeConfig, TileSetProbe, TileSourceConfig, TileSourceDetector, DEFAULT_DESCRIPTOR_TIMEOUT,
};
use crate::tile::{
    ConcurrentTileDownloader, DownloadConfig, DownloadReport, GridSize, NoopProgress,
    ProgressCallback, TileRecord, TileStore,
};

// =============================================================================
// State
// =============================================================================

/// Stage of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Detecting,
    Probing,
    Downloading,
    Analyzing,
    Stitching,
    Done,
    Failed,
}

impl PipelineState {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Detecting => "detecting",
            PipelineState::Probing => "probing",
            PipelineState::Downloading => "downloading",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Stitching => "stitching",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Detecting)
                | (Detecting, Probing)
                | (Detecting, Failed)
                | (Probing, Probing)
                | (Probing, Downloading)
                | (Probing, Done)
                | (Downloading, Analyzing)
                | (Downloading, Failed)
                | (Analyzing, Stitching)
                | (Stitching, Probing)
                | (Stitching, Done)
        )
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Tuning of every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub descriptor_timeout: Duration,
    pub probe: ProbeConfig,
    pub download: DownloadConfig,
    pub analyzer: AnalyzerConfig,
    pub stitch: StitchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
            probe: ProbeConfig::default(),
            download: DownloadConfig::default(),
            analyzer: AnalyzerConfig::default(),
            stitch: StitchConfig::default(),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// A region that could not be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionFailure {
    pub region: usize,
    pub error: String,
}

/// Analysis and stitching results for one tile set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchSummary {
    pub regions: Vec<MosaicRegion>,
    pub outputs: Vec<StitchedOutput>,
    pub region_errors: Vec<RegionFailure>,
}

impl StitchSummary {
    fn new(regions: Vec<MosaicRegion>, results: Vec<Result<StitchedOutput, StitchError>>) -> Self {
        let mut outputs = Vec::new();
        let mut region_errors = Vec::new();
        for (region, result) in regions.iter().zip(results) {
            match result {
                Ok(output) => outputs.push(output),
                Err(e) => region_errors.push(RegionFailure {
                    region: region.index,
                    error: e.to_string(),
                }),
            }
        }

        Self {
            regions,
            outputs,
            region_errors,
        }
    }
}

/// Everything that happened to one detected source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub index: usize,
    pub config: TileSourceConfig,
    pub level: Option<u32>,
    pub grid: Option<GridSize>,
    pub download: Option<DownloadReport>,
    pub stitch: Option<StitchSummary>,
    /// Why the source was skipped or failed
    pub error: Option<String>,
}

impl SourceReport {
    fn new(index: usize, config: TileSourceConfig) -> Self {
        Self {
            index,
            config,
            level: None,
            grid: None,
            download: None,
            stitch: None,
            error: None,
        }
    }
}

/// Report of a whole run, written as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub page_url: String,
    pub sources: Vec<SourceReport>,
    pub warnings: Vec<String>,
    pub final_state: PipelineState,
}

impl PipelineReport {
    fn new(page_url: &str) -> Self {
        Self {
            page_url: page_url.to_string(),
            sources: Vec::new(),
            warnings: Vec::new(),
            final_state: PipelineState::Idle,
        }
    }

    /// Every written output across all sources.
    pub fn outputs(&self) -> impl Iterator<Item = &StitchedOutput> {
        self.sources
            .iter()
            .filter_map(|s| s.stitch.as_ref())
            .flat_map(|s| s.outputs.iter())
    }

    pub async fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| PipelineError::Report(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::Report(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PipelineError::Report(format!("{}: {}", path.display(), e)))
    }
}

/// `{stem}_report.json` next to the output base.
pub fn report_path(output_base: &Path) -> PathBuf {
    let stem = output_base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    output_base.with_file_name(format!("{}_report.json", stem))
}

/// Output base of source `index` (1-based) when a page has several sources.
pub fn source_output_base(output_base: &Path, index: usize) -> PathBuf {
    let stem = output_base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    let name = match output_base.extension() {
        Some(ext) => format!("{}_s{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_s{}", stem, index),
    };
    output_base.with_file_name(name)
}

// =============================================================================
// Pipeline
// =============================================================================

/// Drives detection, probing, download, analysis and stitching.
pub struct Pipeline<C: HttpClient> {
    client: Arc<C>,
    config: PipelineConfig,
    state: PipelineState,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl<C: HttpClient + 'static> Pipeline<C> {
    pub fn new(client: Arc<C>, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            state: PipelineState::Idle,
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        debug!(from = self.state.name(), to = next.name(), "Pipeline transition");
        self.state = next;
        Ok(())
    }

    /// Move to `Failed`, persist the report, and hand back `error`.
    async fn fail(
        &mut self,
        mut report: PipelineReport,
        output_base: &Path,
        error: PipelineError,
    ) -> Result<PipelineReport, PipelineError> {
        self.transition(PipelineState::Failed)?;
        report.final_state = PipelineState::Failed;
        if let Err(e) = report.write(&report_path(output_base)).await {
            warn!(error = %e, "Could not write failure report");
        }
        Err(error)
    }

    /// Run the whole pipeline for one page.
    ///
    /// Returns the report, which is also written to `{stem}_report.json`.
    pub async fn run<R>(
        &mut self,
        ctx: &R,
        work_dir: &Path,
        output_base: &Path,
    ) -> Result<PipelineReport, PipelineError>
    where
        R: RenderingContext + ?Sized,
    {
        let mut report = PipelineReport::new(ctx.page_url());

        self.transition(PipelineState::Detecting)?;
        let detector = TileSourceDetector::new(Arc::clone(&self.client))
            .with_descriptor_timeout(self.config.descriptor_timeout);
        let sources = detector.detect_all(ctx).await;

        if sources.is_empty() {
            let error = PipelineError::ConfigNotFound {
                page_url: ctx.page_url().to_string(),
            };
            report.warnings.push(error.to_string());
            return self.fail(report, output_base, error).await;
        }

        self.transition(PipelineState::Probing)?;
        let multi = sources.len() > 1;

        for (i, source) in sources.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                report
                    .warnings
                    .push(format!("Cancelled before source {}", i + 1));
                break;
            }
            if i > 0 {
                self.transition(PipelineState::Probing)?;
            }

            let (store, base) = if multi {
                (
                    TileStore::new(work_dir.join(format!("source_{}", i + 1))),
                    source_output_base(output_base, i + 1),
                )
            } else {
                (TileStore::new(work_dir), output_base.to_path_buf())
            };

            info!(
                source = i + 1,
                base_url = source.base_url(),
                strategy = ?source.strategy(),
                "Processing tile source"
            );

            let mut source_report = SourceReport::new(i + 1, source.clone());

            let Some((level, grid)) = self.probe(&source).await else {
                let error = PipelineError::ProbeInconclusive {
                    base_url: source.base_url().to_string(),
                };
                warn!(source = i + 1, error = %error, "Skipping source");
                report.warnings.push(error.to_string());
                source_report.error = Some(error.to_string());
                report.sources.push(source_report);
                continue;
            };
            source_report.level = Some(level);
            source_report.grid = Some(grid);

            self.transition(PipelineState::Downloading)?;
            let downloader =
                ConcurrentTileDownloader::with_config(Arc::clone(&self.client), self.config.download.clone())
                    .with_progress(Arc::clone(&self.progress))
                    .with_cancellation(self.cancel.clone());

            let download = match downloader.download(&source, level, grid, &store).await {
                Ok(download) => download,
                Err(e) => {
                    if matches!(e, TileDownloadError::NoTiles { .. }) {
                        if let Err(io) = store.remove_level(level).await {
                            warn!(error = %io, "Could not remove empty tile directory");
                        }
                    }
                    source_report.error = Some(e.to_string());
                    report.sources.push(source_report);
                    return self.fail(report, output_base, e.into()).await;
                }
            };

            if download.failed > 0 {
                report.warnings.push(format!(
                    "Source {}: {} of {} tiles failed",
                    i + 1,
                    download.failed,
                    download.attempted
                ));
            }
            if download.cancelled {
                report
                    .warnings
                    .push(format!("Source {}: download cancelled", i + 1));
            }

            self.transition(PipelineState::Analyzing)?;
            let records = download.records.clone();
            source_report.download = Some(download);

            let analyzer = MosaicAnalyzer::new(self.config.analyzer.clone());
            let analyze_records = records.clone();
            let regions = tokio::task::spawn_blocking(move || analyzer.analyze(&analyze_records))
                .await
                .map_err(|e| PipelineError::Io(format!("Analysis task failed: {}", e)))?;
            info!(source = i + 1, regions = regions.len(), "Regions detected");

            self.transition(PipelineState::Stitching)?;
            let stitcher = MosaicStitcher::new(self.config.stitch.clone());
            let summary = tokio::task::spawn_blocking(move || {
                let results = stitcher.stitch_all(&regions, &records, &base);
                StitchSummary::new(regions, results)
            })
            .await
            .map_err(|e| PipelineError::Io(format!("Stitch task failed: {}", e)))?;

            for failure in &summary.region_errors {
                report.warnings.push(format!(
                    "Source {}: region {} failed: {}",
                    i + 1,
                    failure.region,
                    failure.error
                ));
            }
            source_report.stitch = Some(summary);
            report.sources.push(source_report);
        }

        self.transition(PipelineState::Done)?;
        report.final_state = PipelineState::Done;
        report.write(&report_path(output_base)).await?;

        info!(
            outputs = report.outputs().count(),
            warnings = report.warnings.len(),
            "Pipeline finished"
        );
        Ok(report)
    }

    /// Highest level and its grid. Known dimensions take precedence over
    /// probing the grid.
    async fn probe(&self, source: &TileSourceConfig) -> Option<(u32, GridSize)> {
        let probe = TileSetProbe::with_config(Arc::clone(&self.client), self.config.probe.clone());
        let level = probe.find_highest_level(source).await?;

        let grid = match source.level_grid(level) {
            Some(grid) => grid,
            None => probe.estimate_grid(source, level).await,
        };

        if grid.is_empty() {
            return None;
        }
        info!(level, grid = %grid, "Probed tile set");
        Some((level, grid))
    }
}

/// Analyze and stitch an existing tile directory.
///
/// Only the highest level found in `dir` is used. Blocking; call from
/// `spawn_blocking` in async code.
pub fn stitch_tile_directory(
    dir: &Path,
    output_base: &Path,
    analyzer: &AnalyzerConfig,
    stitch: &StitchConfig,
) -> Result<StitchSummary, StitchError> {
    let records: Vec<TileRecord> = TileStore::collect(dir)?;
    let level = records
        .iter()
        .map(|r| r.coord().level)
        .max()
        .ok_or_else(|| StitchError::EmptyDirectory(dir.to_path_buf()))?;
    let records: Vec<TileRecord> = records
        .into_iter()
        .filter(|r| r.coord().level == level)
        .collect();

    info!(dir = %dir.display(), level, tiles = records.len(), "Stitching tile directory");

    let regions = MosaicAnalyzer::new(analyzer.clone()).analyze(&records);
    let results = MosaicStitcher::new(stitch.clone()).stitch_all(&regions, &records, output_base);
    Ok(StitchSummary::new(regions, results))
}
