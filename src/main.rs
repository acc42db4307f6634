//! deepzoom-harvest - download deep-zoom tile pyramids and rebuild the images.
//!
//! This binary wires the CLI to the library pipeline.

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepzoom_harvest::{
    config::{Cli, Command, FetchConfig, ProbeCommandConfig, StitchCommandConfig},
    io::{HttpPageContext, ReqwestHttpClient},
    pipeline::{report_path, stitch_tile_directory, Pipeline},
    source::{TileSetProbe, TileSourceDetector},
    tile::{LogProgress, ProgressCallback},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Fetch(config) => run_fetch(config).await,
        Command::Stitch(config) => run_stitch(config).await,
        Command::Probe(config) => run_probe(config).await,
    }
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Configuration:");
    info!("  Page: {}", config.url);
    info!("  Output: {}", config.output.display());
    info!("  Work dir: {}", config.work_dir.display());
    info!(
        "  Workers: {}, retries: {}",
        config.tuning.workers, config.tuning.max_retries
    );

    let client = match ReqwestHttpClient::with_user_agent(&config.user_agent) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = HttpPageContext::new(Arc::clone(&client), config.url.clone());
    if let Some(ref path) = config.request_log {
        match read_request_log(path).await {
            Ok(requests) => {
                info!("  Request log: {} URL(s)", requests.len());
                ctx = ctx.with_observed_requests(requests);
            }
            Err(e) => {
                error!("Failed to read request log {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    let progress: Arc<dyn ProgressCallback> = if config.no_progress {
        Arc::new(LogProgress::new())
    } else {
        Arc::new(BarProgress::new())
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let mut pipeline = Pipeline::new(client, config.tuning.to_pipeline_config())
        .with_progress(progress)
        .with_cancellation(cancel);

    let report = match pipeline.run(&ctx, &config.work_dir, &config.output).await {
        Ok(report) => report,
        Err(e) => {
            error!("Pipeline failed: {}", e);
            error!("Report: {}", report_path(&config.output).display());
            return ExitCode::FAILURE;
        }
    };

    for warning in &report.warnings {
        warn!("{}", warning);
    }

    let outputs: Vec<_> = report.outputs().collect();
    if outputs.is_empty() {
        error!("No images were written");
        return ExitCode::FAILURE;
    }

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    for output in &outputs {
        info!("  {}", output);
    }
    info!("  Report: {}", report_path(&config.output).display());
    info!("────────────────────────────────────────────────────────────────");

    ExitCode::SUCCESS
}

/// Read URLs captured while a page loaded.
///
/// Accepts a plain list or any text dump (HAR, DevTools log); every
/// `http(s)://` URL found is returned in order.
async fn read_request_log(path: &Path) -> std::io::Result<Vec<String>> {
    static URL: OnceLock<Regex> = OnceLock::new();
    let re = URL.get_or_init(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).expect("static regex"));

    let text = tokio::fs::read_to_string(path).await?;
    Ok(re
        .find_iter(&text)
        .map(|m| m.as_str().trim_end_matches([',', ')', ']']).to_string())
        .collect())
}

/// Cancel `token` on the first Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight tiles");
            token.cancel();
        }
    });
}

/// Terminal progress bar for tile downloads.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Tiles: [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&self, total: usize) {
        self.bar.reset();
        self.bar.set_message("");
        self.bar.set_length(total as u64);
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn on_tile_complete(&self, index: usize, success: bool) {
        if !success {
            self.bar.set_message("(some tiles failed)");
        }
        self.bar.set_position(index as u64);
    }

    fn on_complete(&self) {
        self.bar.finish();
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "deepzoom_harvest=debug"
    } else {
        "deepzoom_harvest=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Stitch Command
// =============================================================================

async fn run_stitch(config: StitchCommandConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let analyzer = config.tuning.analyzer_config();
    let stitch = config.tuning.stitch_config();
    let dir = config.dir.clone();
    let output = config.output.clone();

    let result = tokio::task::spawn_blocking(move || {
        stitch_tile_directory(&dir, &output, &analyzer, &stitch)
    })
    .await;

    let summary = match result {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            error!("Stitch failed: {}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Stitch task failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for failure in &summary.region_errors {
        warn!("Region {} failed: {}", failure.region, failure.error);
    }
    for output in &summary.outputs {
        info!("  {}", output);
    }

    if summary.outputs.is_empty() {
        error!("No images were written");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Probe Command
// =============================================================================

async fn run_probe(config: ProbeCommandConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let client = match ReqwestHttpClient::with_user_agent(&config.user_agent) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = HttpPageContext::new(Arc::clone(&client), config.url.clone());
    if let Some(ref path) = config.request_log {
        match read_request_log(path).await {
            Ok(requests) => ctx = ctx.with_observed_requests(requests),
            Err(e) => {
                eprintln!("Error: {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        }
    }

    let pipeline_config = config.tuning.to_pipeline_config();
    let sources = TileSourceDetector::new(Arc::clone(&client))
        .with_descriptor_timeout(pipeline_config.descriptor_timeout)
        .detect_all(&ctx)
        .await;

    if sources.is_empty() {
        eprintln!("No tile source found on {}", config.url);
        return ExitCode::FAILURE;
    }

    let probe = TileSetProbe::with_config(Arc::clone(&client), pipeline_config.probe);
    let mut results = Vec::with_capacity(sources.len());
    for source in &sources {
        let level = probe.find_highest_level(source).await;
        let grid = match level {
            Some(level) => match source.level_grid(level) {
                Some(grid) => Some(grid),
                None => Some(probe.estimate_grid(source, level).await),
            },
            None => None,
        };

        results.push(serde_json::json!({
            "source": source,
            "level": level,
            "grid": grid,
            "tiles": grid.map(|g| g.tile_count()),
        }));
    }

    match serde_json::to_string_pretty(&results) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
