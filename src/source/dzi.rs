//! Deep Zoom Image (DZI) descriptor handling and level math.
//!
//! # DZI Format Overview
//!
//! Deep Zoom numbers levels from the smallest image upward:
//! - DZI level 0 = 1x1 pixel (lowest resolution)
//! - DZI max level = full resolution
//!
//! Tiles of a descriptor `https://host/path/image.dzi` live under
//! `https://host/path/image_files/{level}/{col}_{row}.{format}`.
//!
//! Descriptors come in two encodings: the XML document
//!
//! ```xml
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
//!        TileSize="254" Overlap="1" Format="jpg">
//!   <Size Width="46920" Height="33600" />
//! </Image>
//! ```
//!
//! and its JSON transliteration
//! `{"Image": {"TileSize": 254, "Overlap": 1, "Format": "jpg", "Size": {...}}}`
//! which viewers also accept inline in their `tileSources` list.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Geometry carried by a DZI descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Tile base URL, present only for inline descriptors carrying `Url`
    pub url: Option<String>,
}

fn attribute_regex(name: &str) -> Regex {
    // Matches Name="value" or Name='value'
    Regex::new(&format!(r#"\b{}\s*=\s*["']([^"']*)["']"#, name)).expect("static regex")
}

fn xml_attribute(body: &str, name: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        ["TileSize", "Overlap", "Format", "Width", "Height"]
            .into_iter()
            .map(|n| (n, attribute_regex(n)))
            .collect()
    });

    patterns
        .iter()
        .find(|(n, _)| *n == name)
        .and_then(|(_, re)| re.captures(body))
        .map(|caps| caps[1].trim().to_string())
}

/// Parse a descriptor body, XML first, then JSON.
///
/// Returns `None` when neither encoding yields a tile size.
pub fn parse_dzi_descriptor(body: &str) -> Option<DziDescriptor> {
    let trimmed = body.trim_start();

    if trimmed.starts_with('{') {
        let value: Value = serde_json::from_str(trimmed).ok()?;
        return DziDescriptor::from_json(&value);
    }

    if !trimmed.contains("<Image") {
        return None;
    }

    let tile_size = xml_attribute(body, "TileSize")?.parse().ok()?;
    Some(DziDescriptor {
        tile_size,
        overlap: xml_attribute(body, "Overlap")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        format: xml_attribute(body, "Format").unwrap_or_else(|| "jpg".to_string()),
        width: xml_attribute(body, "Width").and_then(|v| v.parse().ok()),
        height: xml_attribute(body, "Height").and_then(|v| v.parse().ok()),
        url: None,
    })
}

/// Read a non-negative integer that may be encoded as a JSON number or string.
fn json_u32(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl DziDescriptor {
    /// Interpret `{Image: {Url, TileSize, Overlap, Format, Size: {Width, Height}}}`.
    ///
    /// The outer `Image` wrapper is optional.
    pub fn from_json(value: &Value) -> Option<Self> {
        let image = value.get("Image").unwrap_or(value);
        let tile_size = json_u32(image.get("TileSize"))?;
        let size = image.get("Size");

        Some(Self {
            tile_size,
            overlap: json_u32(image.get("Overlap")).unwrap_or(0),
            format: image
                .get("Format")
                .and_then(Value::as_str)
                .unwrap_or("jpg")
                .to_string(),
            width: size.and_then(|s| json_u32(s.get("Width"))),
            height: size.and_then(|s| json_u32(s.get("Height"))),
            url: image.get("Url").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// Tile base URL for a descriptor URL: `.../name.dzi` -> `.../name_files`.
///
/// Query strings are dropped. URLs without a `.dzi` suffix get `_files`
/// appended.
pub fn descriptor_base_url(descriptor_url: &str) -> String {
    let without_query = descriptor_url
        .split(['?', '#'])
        .next()
        .unwrap_or(descriptor_url);

    match without_query.strip_suffix(".dzi") {
        Some(stem) => format!("{}_files", stem),
        None => format!("{}_files", without_query.trim_end_matches('/')),
    }
}

/// Calculate the maximum DZI level for given image dimensions.
///
/// max_level = ceil(log2(max(width, height)))
pub fn calculate_max_dzi_level(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    // ceil(log2(n)) == bit length of (n - 1)
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Calculate dimensions at a specific DZI level.
///
/// At DZI level L: `ceil(dim / 2^(max_level - L))`. Levels above the max
/// yield `(0, 0)`.
pub fn dzi_level_dimensions(width: u32, height: u32, level: u32, max_level: u32) -> (u32, u32) {
    if level > max_level {
        return (0, 0);
    }

    let Some(scale) = 1u64.checked_shl(max_level - level) else {
        return (1, 1);
    };
    let level_width = (width as u64).div_ceil(scale) as u32;
    let level_height = (height as u64).div_ceil(scale) as u32;

    (level_width.max(1), level_height.max(1))
}

/// Calculate the tile grid covering a level of the given pixel size.
pub fn dzi_tile_count(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    let tile_size = tile_size.max(1);
    let tiles_x = level_width.div_ceil(tile_size);
    let tiles_y = level_height.div_ceil(tile_size);
    (tiles_x.max(1), tiles_y.max(1))
}

/// Parse DZI tile coordinates from a filename like `3_5.jpg` or `3_5`.
///
/// Returns `(col, row)`.
pub fn parse_dzi_tile_coords(filename: &str) -> Option<(u32, u32)> {
    let name = match filename.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => filename,
    };

    let (col, row) = name.split_once('_')?;
    if row.contains('_') {
        return None;
    }

    Some((col.parse().ok()?, row.parse().ok()?))
}
