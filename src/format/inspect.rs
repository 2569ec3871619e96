//! Source image inspection.
//!
//! [`inspect`] opens an upload, identifies its container and extracts the
//! metadata shown to users and cached on the slide record. It performs only
//! small ranged reads and never decodes pixels.
//!
//! # Aperio Metadata
//!
//! SVS files store acquisition metadata in the first directory's
//! `ImageDescription` as pipe-separated `key = value` pairs:
//!
//! ```text
//! Aperio Image Library v11.2.1
//! 46000x32914 [0,100 46000x32814] (256x256) JPEG/RGB Q=30|AppMag = 20|MPP = 0.4990
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::FormatError;
use crate::io::{FileRangeReader, RangeReader};

use super::detect::SlideFormat;
use super::tiff::{TiffSummary, BIGTIFF_HEADER_SIZE};

/// Largest image, in pixels, that conversion will decode whole.
///
/// Sources without a tiled pyramid are decoded into memory before their mip
/// chain is built; anything larger is rejected at upload.
pub const MAX_DECODED_PIXELS: u64 = 256 * 1024 * 1024;

/// Reject images that would have to be decoded whole and are too large to.
///
/// # Errors
///
/// [`FormatError::UnsupportedFormat`] when `width * height` exceeds
/// [`MAX_DECODED_PIXELS`].
pub fn check_decode_budget(width: u32, height: u32) -> Result<(), FormatError> {
    let pixels = width as u64 * height as u64;
    if pixels > MAX_DECODED_PIXELS {
        return Err(FormatError::UnsupportedFormat {
            reason: format!(
                "{}x{} image without a tiled pyramid exceeds the decode limit of {} pixels",
                width, height, MAX_DECODED_PIXELS
            ),
        });
    }
    Ok(())
}

/// Metadata extracted from a source image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideMetadata {
    /// Detected container, as a display name
    pub format: String,

    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Scanner vendor, when the container declares one
    pub vendor: Option<String>,

    /// Objective magnification (e.g. 20, 40)
    pub objective_power: Option<f64>,

    /// Microns per pixel at full resolution
    pub mpp: Option<f64>,

    /// Resolution levels stored in the file itself
    pub level_count: usize,

    /// File size in bytes
    pub file_size: u64,
}

/// Vendor metadata parsed from a TIFF `ImageDescription`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionMetadata {
    pub vendor: Option<String>,
    pub objective_power: Option<f64>,
    pub mpp: Option<f64>,
    pub properties: HashMap<String, String>,
}

impl DescriptionMetadata {
    /// Parse an Aperio-style description. Unknown text yields empty metadata.
    pub fn parse(description: &str) -> Self {
        let mut metadata = DescriptionMetadata::default();

        if description.contains("Aperio") {
            metadata.vendor = Some("aperio".to_string());
        }

        for part in description.split('|') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "MPP" => metadata.mpp = value.parse().ok(),
                "AppMag" => metadata.objective_power = value.parse().ok(),
                _ => {}
            }
            metadata
                .properties
                .insert(key.to_string(), value.to_string());
        }

        metadata
    }
}

/// Open `path` and extract its metadata.
///
/// # Errors
///
/// - [`FormatError::UnsupportedFormat`] when the contents are neither TIFF nor
///   a raster the decoder recognizes, or a TIFF has no readable image
/// - [`FormatError::Io`] when the file cannot be read
pub async fn inspect(path: &Path) -> Result<SlideMetadata, FormatError> {
    let reader = FileRangeReader::open(path).await?;
    let size = reader.size();

    let head_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
    let head = reader.read_exact_at(0, head_len).await?;

    match SlideFormat::sniff(&head) {
        Some(SlideFormat::Raster) => inspect_raster(path, size).await,
        Some(_) => inspect_tiff(&reader).await,
        None => Err(FormatError::UnsupportedFormat {
            reason: format!("{} is not a TIFF or raster image", file_label(path)),
        }),
    }
}

async fn inspect_tiff(reader: &FileRangeReader) -> Result<SlideMetadata, FormatError> {
    let summary = TiffSummary::read(reader).await?;

    let first = summary
        .directories
        .first()
        .ok_or_else(|| FormatError::UnsupportedFormat {
            reason: "TIFF contains no image directories".to_string(),
        })?;

    let description = first
        .description
        .as_deref()
        .map(DescriptionMetadata::parse)
        .unwrap_or_default();

    if summary.pyramid_directories().next().is_none() {
        check_decode_budget(first.width, first.height)?;
    }

    let format = if description.vendor.as_deref() == Some("aperio") {
        SlideFormat::AperioSvs
    } else {
        SlideFormat::GenericTiff
    };

    debug!(
        file = reader.identifier(),
        directories = summary.directories.len(),
        format = format.name(),
        "Inspected TIFF"
    );

    Ok(SlideMetadata {
        format: format.name().to_string(),
        width: first.width,
        height: first.height,
        vendor: description.vendor,
        objective_power: description.objective_power,
        mpp: description.mpp,
        level_count: summary.pyramid_directories().count().max(1),
        file_size: reader.size(),
    })
}

async fn inspect_raster(path: &Path, file_size: u64) -> Result<SlideMetadata, FormatError> {
    let owned = path.to_path_buf();
    let (width, height) = tokio::task::spawn_blocking(move || {
        image::ImageReader::open(&owned)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| e.to_string())?
            .into_dimensions()
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| FormatError::Decode {
        message: e.to_string(),
    })?
    .map_err(|reason| FormatError::UnsupportedFormat { reason })?;
    check_decode_budget(width, height)?;

    Ok(SlideMetadata {
        format: SlideFormat::Raster.name().to_string(),
        width,
        height,
        vendor: None,
        objective_power: None,
        mpp: None,
        level_count: 1,
        file_size,
    })
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
