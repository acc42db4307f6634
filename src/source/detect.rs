//! Tile-source detection.
//!
//! A viewer page is inspected with three strategies, in priority order:
//!
//! ```text
//! RenderingContext
//!   ├── run_script(VIEWER_STATE_SCRIPT)  ──► LiveState     {found, tileSources}
//!   ├── static_markup()                  ──► StaticMarkup  tileSources literal,
//!   │                                                      quoted *.dzi, data-* attrs
//!   └── observed_requests()              ──► Traffic       .../{l}/{c}_{r}.{ext}, *.dzi
//!                  │
//!                  ▼
//!          Candidate::Descriptor ──► HttpClient::get ──► parse_dzi_descriptor
//!          Candidate::Source     ──────────────────────► TileSourceConfig
//! ```
//!
//! A strategy the context cannot serve is skipped. Results are de-duplicated
//! by normalized base URL, keeping the first (highest priority) sighting.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::config::{DetectionStrategy, TileSourceConfig};
use super::dzi::{descriptor_base_url, parse_dzi_descriptor, DziDescriptor};
use crate::io::{HttpClient, RenderingContext};

/// Default timeout for fetching a `.dzi` descriptor.
pub const DEFAULT_DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Script returning `{found, tileSources}` from a live OpenSeadragon viewer.
pub const VIEWER_STATE_SCRIPT: &str = r#"
if (typeof OpenSeadragon !== 'undefined' && window.viewer) {
    var tileSources = [];
    if (window.viewer.tileSources) {
        tileSources = window.viewer.tileSources;
    } else if (window.viewer.source) {
        tileSources = [window.viewer.source];
    }
    return { tileSources: tileSources, found: true };
}
return { found: false };
"#;

// =============================================================================
// Patterns
// =============================================================================

fn tile_sources_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)tileSources\s*:\s*(\[.*?\]|"[^"]*"|'[^']*')"#).expect("static regex")
    })
}

fn dzi_literal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']([^"'\s<>]+\.dzi(?:\?[^"'\s<>]*)?)["']"#).expect("static regex")
    })
}

fn data_attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"data-(?:dzi|tile-source|manifest)\s*=\s*["']([^"']+)["']"#)
            .expect("static regex")
    })
}

/// `{base}/{level}/{col}_{row}.{ext}` with an optional query string.
fn tile_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+)/\d+/\d+_\d+\.([A-Za-z0-9]+)(?:\?.*)?$").expect("static regex")
    })
}

fn bare_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([{,]\s*)([A-Za-z_$][A-Za-z0-9_$]*)\s*:").expect("static regex"))
}

fn trailing_comma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static regex"))
}

/// Turn a JavaScript object/array literal into JSON.
///
/// Single quotes become double quotes, bare keys are quoted and trailing
/// commas are removed. Strings containing apostrophes do not survive this.
pub fn relax_js_literal(js: &str) -> String {
    let quoted = js.replace('\'', "\"");
    let keyed = bare_key_regex().replace_all(&quoted, "$1\"$2\":");
    trailing_comma_regex().replace_all(&keyed, "$1").into_owned()
}

// =============================================================================
// Candidates
// =============================================================================

/// A tile source found on the page, before descriptors are resolved.
#[derive(Debug, Clone, PartialEq)]
enum Candidate {
    /// URL of a `.dzi` descriptor that still has to be fetched
    Descriptor {
        url: String,
        strategy: DetectionStrategy,
    },
    /// Fully addressed source
    Source(TileSourceConfig),
}

fn resolve_url(page_url: &str, raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(page_url).and_then(|base| base.join(raw)) {
        Ok(url) => url.to_string(),
        Err(_) => raw.to_string(),
    }
}

fn is_descriptor_url(url: &str) -> bool {
    url.split(['?', '#'])
        .next()
        .is_some_and(|path| path.to_ascii_lowercase().ends_with(".dzi"))
}

/// Interpret one URL string found anywhere on the page.
fn candidate_from_url(url: String, strategy: DetectionStrategy) -> Candidate {
    if is_descriptor_url(&url) {
        return Candidate::Descriptor { url, strategy };
    }

    if let Some(caps) = tile_url_regex().captures(&url) {
        return Candidate::Source(TileSourceConfig::new(&caps[1], strategy).with_format(&caps[2]));
    }

    Candidate::Source(TileSourceConfig::new(url, strategy))
}

fn config_from_inline(
    dzi: &DziDescriptor,
    page_url: &str,
    strategy: DetectionStrategy,
) -> Option<TileSourceConfig> {
    let url = resolve_url(page_url, dzi.url.as_deref()?);
    let base = if is_descriptor_url(&url) {
        descriptor_base_url(&url)
    } else {
        url
    };

    Some(apply_descriptor(TileSourceConfig::new(base, strategy), dzi))
}

fn apply_descriptor(config: TileSourceConfig, dzi: &DziDescriptor) -> TileSourceConfig {
    let config = config
        .with_tile_size(dzi.tile_size)
        .with_overlap(dzi.overlap)
        .with_format(&dzi.format);

    match (dzi.width, dzi.height) {
        (Some(w), Some(h)) => config.with_dimensions(w, h),
        _ => config,
    }
}

/// Collect candidates from a `tileSources` value.
///
/// Accepts a single source or an array of sources. Each source is a URL
/// string, an object with `url` (or `tileSource`) and optional `type`, or an
/// inline DZI object.
fn candidates_from_value(
    value: &Value,
    page_url: &str,
    strategy: DetectionStrategy,
) -> Vec<Candidate> {
    match value {
        Value::Array(items) => items
            .iter()
            .flat_map(|item| candidates_from_value(item, page_url, strategy))
            .collect(),
        Value::String(s) if !s.trim().is_empty() => {
            vec![candidate_from_url(resolve_url(page_url, s), strategy)]
        }
        Value::Object(map) => {
            if map.contains_key("Image") {
                return DziDescriptor::from_json(value)
                    .and_then(|dzi| config_from_inline(&dzi, page_url, strategy))
                    .map(Candidate::Source)
                    .into_iter()
                    .collect();
            }

            let Some(url) = map
                .get("url")
                .or_else(|| map.get("tileSource"))
                .and_then(Value::as_str)
            else {
                debug!("Tile source object without url: {}", value);
                return Vec::new();
            };

            let url = resolve_url(page_url, url);
            // Descriptors are sometimes served as .xml; the type hint decides
            let is_dzi = map.get("type").and_then(Value::as_str) == Some("dzi");
            if is_dzi && tile_url_regex().captures(&url).is_none() {
                return vec![Candidate::Descriptor { url, strategy }];
            }

            match candidate_from_url(url, strategy) {
                Candidate::Source(config) => {
                    let tile_size = map
                        .get("tileSize")
                        .and_then(Value::as_u64)
                        .and_then(|v| u32::try_from(v).ok())
                        .unwrap_or(config.tile_size());
                    vec![Candidate::Source(config.with_tile_size(tile_size))]
                }
                descriptor => vec![descriptor],
            }
        }
        _ => Vec::new(),
    }
}

/// Candidates from a viewer-state object `{found, tileSources}`.
fn candidates_from_state(state: &Value, page_url: &str) -> Vec<Candidate> {
    if !state.get("found").and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }

    state
        .get("tileSources")
        .map(|sources| candidates_from_value(sources, page_url, DetectionStrategy::LiveState))
        .unwrap_or_default()
}

/// Candidates from page source.
fn scan_markup(markup: &str, page_url: &str) -> Vec<Candidate> {
    let strategy = DetectionStrategy::StaticMarkup;
    let mut candidates = Vec::new();

    for caps in tile_sources_regex().captures_iter(markup) {
        let literal = relax_js_literal(&caps[1]);
        match serde_json::from_str::<Value>(&literal) {
            Ok(value) => candidates.extend(candidates_from_value(&value, page_url, strategy)),
            Err(e) => debug!(error = %e, "Unparseable tileSources literal"),
        }
    }

    for caps in dzi_literal_regex().captures_iter(markup) {
        candidates.push(Candidate::Descriptor {
            url: resolve_url(page_url, &caps[1]),
            strategy,
        });
    }

    for caps in data_attribute_regex().captures_iter(markup) {
        candidates.push(candidate_from_url(resolve_url(page_url, &caps[1]), strategy));
    }

    candidates
}

/// Candidates from observed request URLs, in order of first sighting.
fn scan_requests(requests: &[String]) -> Vec<Candidate> {
    let strategy = DetectionStrategy::Traffic;
    let mut candidates = Vec::new();

    for url in requests {
        let url = url.trim();
        if is_descriptor_url(url) {
            candidates.push(Candidate::Descriptor {
                url: url.to_string(),
                strategy,
            });
        } else if let Some(caps) = tile_url_regex().captures(url) {
            candidates.push(Candidate::Source(
                TileSourceConfig::new(&caps[1], strategy).with_format(&caps[2]),
            ));
        }
    }

    candidates
}

// =============================================================================
// Detector
// =============================================================================

/// Discovers tile-pyramid configurations for a viewer page.
pub struct TileSourceDetector<C: HttpClient> {
    client: Arc<C>,
    descriptor_timeout: Duration,
}

impl<C: HttpClient> TileSourceDetector<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
        }
    }

    pub fn with_descriptor_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor_timeout = timeout;
        self
    }

    /// First detected configuration, if any.
    pub async fn detect<R>(&self, ctx: &R) -> Option<TileSourceConfig>
    where
        R: RenderingContext + ?Sized,
    {
        self.detect_all(ctx).await.into_iter().next()
    }

    /// Every detected configuration, de-duplicated, in strategy priority order.
    pub async fn detect_all<R>(&self, ctx: &R) -> Vec<TileSourceConfig>
    where
        R: RenderingContext + ?Sized,
    {
        let page_url = ctx.page_url().to_string();
        let mut candidates = Vec::new();

        match ctx.run_script(VIEWER_STATE_SCRIPT).await {
            Ok(state) => {
                let found = candidates_from_state(&state, &page_url);
                debug!(count = found.len(), "Live viewer state inspected");
                candidates.extend(found);
            }
            Err(e) => debug!(error = %e, "Live-state inspection skipped"),
        }

        match ctx.static_markup().await {
            Ok(markup) => {
                let found = scan_markup(&markup, &page_url);
                debug!(count = found.len(), "Static markup scanned");
                candidates.extend(found);
            }
            Err(e) => debug!(error = %e, "Static-markup scan skipped"),
        }

        match ctx.observed_requests().await {
            Ok(requests) => {
                let found = scan_requests(&requests);
                debug!(
                    requests = requests.len(),
                    count = found.len(),
                    "Observed traffic scanned"
                );
                candidates.extend(found);
            }
            Err(e) => debug!(error = %e, "Traffic observation skipped"),
        }

        let mut seen_descriptors = HashSet::new();
        let mut seen_bases = HashSet::new();
        let mut configs = Vec::new();

        for candidate in candidates {
            let config = match candidate {
                Candidate::Source(config) => config,
                Candidate::Descriptor { url, strategy } => {
                    if !seen_descriptors.insert(url.clone()) {
                        continue;
                    }
                    self.resolve_descriptor(&url, strategy).await
                }
            };

            if seen_bases.insert(config.normalized_base()) {
                configs.push(config);
            }
        }

        if configs.is_empty() {
            info!(page = %page_url, "No tile source detected");
        } else {
            info!(page = %page_url, count = configs.len(), "Detected tile sources");
        }

        configs
    }

    /// Fetch and parse a descriptor. Failures still yield a config with
    /// default geometry addressed at the descriptor's tile base.
    async fn resolve_descriptor(&self, url: &str, strategy: DetectionStrategy) -> TileSourceConfig {
        let config = TileSourceConfig::new(descriptor_base_url(url), strategy);

        let body = match self.client.get(url, self.descriptor_timeout).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = url, error = %e, "Descriptor fetch failed, using default geometry");
                return config;
            }
        };

        match parse_dzi_descriptor(&String::from_utf8_lossy(&body)) {
            Some(dzi) => {
                debug!(
                    url = url,
                    tile_size = dzi.tile_size,
                    width = ?dzi.width,
                    height = ?dzi.height,
                    "Parsed DZI descriptor"
                );
                apply_descriptor(config, &dzi)
            }
            None => {
                warn!(url = url, "Unparseable descriptor, using default geometry");
                config
            }
        }
    }
}
