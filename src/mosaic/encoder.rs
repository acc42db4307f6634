//! Raster encoder for stitched mosaics.
//!
//! # Design Decisions
//!
//! - **Format follows the path**: `.png` encodes lossless PNG, every other
//!   extension encodes JPEG. No other output formats are produced.
//!
//! - **Quality is JPEG-only**: PNG ignores the quality argument.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::error::StitchError;

/// Default quality of full-size outputs.
pub const DEFAULT_OUTPUT_QUALITY: u8 = 95;

/// Default quality of previews.
pub const DEFAULT_PREVIEW_QUALITY: u8 = 85;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Pick the format from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => OutputFormat::Png,
            _ => OutputFormat::Jpeg,
        }
    }
}

// =============================================================================
// Mosaic Encoder
// =============================================================================

/// Encodes stitched RGB rasters.
#[derive(Debug, Clone, Default)]
pub struct MosaicEncoder {}

impl MosaicEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode `image` in `format`. JPEG quality is clamped to 1-100.
    pub fn encode(&self, image: &RgbImage, format: OutputFormat, quality: u8) -> Result<Bytes, StitchError> {
        let mut output = Vec::new();

        match format {
            OutputFormat::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
                encoder
                    .encode_image(image)
                    .map_err(|e| StitchError::Encode {
                        message: e.to_string(),
                    })?;
            }
            OutputFormat::Png => {
                image
                    .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                    .map_err(|e| StitchError::Encode {
                        message: e.to_string(),
                    })?;
            }
        }

        Ok(Bytes::from(output))
    }

    /// Encode for `path` and write the file, returning the encoded bytes.
    pub fn write(&self, image: &RgbImage, path: &Path, quality: u8) -> Result<Bytes, StitchError> {
        let encoded = self.encode(image, OutputFormat::from_path(path), quality)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StitchError::Io(format!("{}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, &encoded)
            .map_err(|e| StitchError::Io(format!("{}: {}", path.display(), e)))?;

        Ok(encoded)
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
