//! Tile rendering and encoding.
//!
//! A tile is produced from an RGB region by resizing it to the tile's pixel
//! size and encoding it as JPEG or PNG. Both steps are CPU-bound and are run
//! on the blocking pool by the converter.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// TileFormat
// =============================================================================

/// Encoding used for every tile of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Jpeg,
    Png,
}

impl TileFormat {
    /// File extension used on disk and in tile URLs.
    pub const fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpeg",
            TileFormat::Png => "png",
        }
    }

    /// HTTP content type.
    pub const fn content_type(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "image/jpeg",
            TileFormat::Png => "image/png",
        }
    }

    /// Parse a URL extension. `jpg` is accepted as an alias for `jpeg`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(TileFormat::Jpeg),
            "png" => Some(TileFormat::Png),
            _ => None,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileFormat::from_extension(s).ok_or_else(|| format!("unknown tile format '{}'", s))
    }
}

// =============================================================================
// TileEncoder
// =============================================================================

/// Resizes regions to tile size and encodes them.
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    format: TileFormat,
    quality: u8,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(TileFormat::Jpeg, DEFAULT_JPEG_QUALITY)
    }
}

impl TileEncoder {
    /// Create an encoder. Quality is clamped to 1-100 and ignored for PNG.
    pub fn new(format: TileFormat, quality: u8) -> Self {
        Self {
            format,
            quality: clamp_quality(quality),
        }
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Resize `region` to `width` x `height` and encode it.
    ///
    /// The region is passed through untouched when it already has the
    /// target size.
    pub fn render(&self, region: RgbImage, width: u32, height: u32) -> Result<Bytes, TileError> {
        if width == 0 || height == 0 {
            return Err(TileError::EncodeError {
                message: format!("empty tile {}x{}", width, height),
            });
        }

        let tile = if region.dimensions() == (width, height) {
            region
        } else {
            image::imageops::resize(&region, width, height, FilterType::Triangle)
        };
        self.encode(&tile)
    }

    /// Encode an RGB image in this encoder's format.
    pub fn encode(&self, tile: &RgbImage) -> Result<Bytes, TileError> {
        let (width, height) = tile.dimensions();
        let mut output = Vec::new();

        let result = match self.format {
            TileFormat::Jpeg => JpegEncoder::new_with_quality(&mut output, self.quality)
                .write_image(tile.as_raw(), width, height, image::ExtendedColorType::Rgb8),
            TileFormat::Png => PngEncoder::new(Cursor::new(&mut output)).write_image(
                tile.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|e| TileError::EncodeError {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output))
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
