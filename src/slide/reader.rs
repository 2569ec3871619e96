//! Region reads from a decoded source image.
//!
//! The converter never touches pixel formats directly. It asks a
//! [`SlideReader`] for an RGB region at some native level and resamples the
//! result itself. Readers are synchronous: they run on the blocking pool.
//!
//! [`SourceOpener`] is the seam through which the converter obtains readers,
//! so alternative decoders (or test doubles) can be injected.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{Limits, RgbImage};

use crate::error::FormatError;
use crate::format::{check_decode_budget, MAX_DECODED_PIXELS};

use super::tiff_reader::TiffSlideReader;

// =============================================================================
// SlideReader Trait
// =============================================================================

/// Random-access pixel source for one slide.
///
/// Level 0 is the native full resolution; higher indices are progressively
/// smaller. Region coordinates are expressed in the requested level's own
/// pixel space.
pub trait SlideReader: Send + Sync {
    /// Number of native resolution levels.
    fn level_count(&self) -> usize {
        1
    }

    /// Dimensions of a native level.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Dimensions of the full-resolution image.
    fn dimensions(&self) -> Option<(u32, u32)> {
        self.level_dimensions(0)
    }

    /// Downsample factor of a level relative to level 0.
    fn level_downsample(&self, level: usize) -> Option<f64> {
        let (full_w, _) = self.dimensions()?;
        let (w, _) = self.level_dimensions(level)?;
        if w == 0 {
            return None;
        }
        Some(full_w as f64 / w as f64)
    }

    /// Pick the level to read from when producing output at `downsample`.
    ///
    /// Returns the smallest level whose downsample does not exceed the
    /// request, so the region is only ever reduced, never enlarged.
    fn best_level_for_downsample(&self, downsample: f64) -> usize {
        let mut best = 0;
        for level in 0..self.level_count() {
            match self.level_downsample(level) {
                Some(d) if d <= downsample + f64::EPSILON => best = level,
                _ => break,
            }
        }
        best
    }

    /// Read an RGB region of a native level.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::RegionOutOfBounds`] if the region does not lie
    /// entirely within the level, or [`FormatError::Decode`] if pixel data
    /// cannot be produced.
    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, FormatError>;
}

/// Fail with [`FormatError::RegionOutOfBounds`] unless the region is
/// non-empty and lies within a level of dimensions `dims`.
pub(super) fn check_region(
    dims: Option<(u32, u32)>,
    level: usize,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<(), FormatError> {
    let fits = dims.is_some_and(|(w, h)| {
        width > 0
            && height > 0
            && x.checked_add(width).is_some_and(|end| end <= w)
            && y.checked_add(height).is_some_and(|end| end <= h)
    });
    if fits {
        Ok(())
    } else {
        Err(FormatError::RegionOutOfBounds {
            level,
            x,
            y,
            width,
            height,
        })
    }
}

// =============================================================================
// DecodedImageReader
// =============================================================================

/// Mip levels stop halving once both edges are at most this long.
pub const MIP_MIN_EDGE: u32 = 64;

/// Decoder limits for whole-image decodes.
///
/// Allocation is capped at 8 bytes (16-bit RGBA) per budgeted pixel.
pub fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODED_PIXELS * 8);
    limits
}

/// Reader over an image fully decoded into memory.
///
/// Used for plain rasters and for TIFFs without a readable tiled pyramid.
/// Level 0 is the decoded image; each further level halves the previous one
/// (rounding up) until it is no larger than [`MIP_MIN_EDGE`].
pub struct DecodedImageReader {
    levels: Vec<RgbImage>,
}

impl DecodedImageReader {
    /// Decode a file, guessing its format from contents.
    ///
    /// # Errors
    ///
    /// [`FormatError::UnsupportedFormat`] when the image is larger than
    /// [`MAX_DECODED_PIXELS`], [`FormatError::Decode`] for anything the
    /// decoder rejects.
    pub fn open(path: &Path) -> Result<Self, FormatError> {
        let decode_err = |e: image::ImageError| FormatError::Decode {
            message: format!("{}: {}", path.display(), e),
        };
        let open = || {
            image::ImageReader::open(path)
                .and_then(|r| r.with_guessed_format())
                .map_err(|e| FormatError::Decode {
                    message: format!("{}: {}", path.display(), e),
                })
        };

        let (width, height) = open()?.into_dimensions().map_err(decode_err)?;
        check_decode_budget(width, height)?;

        let mut reader = open()?;
        reader.limits(decode_limits());
        let image = reader.decode().map_err(decode_err)?.into_rgb8();

        Ok(Self::from_image(image))
    }

    /// Wrap an already decoded image and build its mip chain.
    pub fn from_image(image: RgbImage) -> Self {
        let mut levels = vec![image];
        loop {
            let (w, h) = levels[levels.len() - 1].dimensions();
            if w.max(h) <= MIP_MIN_EDGE {
                break;
            }
            let next = image::imageops::resize(
                &levels[levels.len() - 1],
                w.div_ceil(2),
                h.div_ceil(2),
                FilterType::Triangle,
            );
            levels.push(next);
        }
        Self { levels }
    }
}

impl SlideReader for DecodedImageReader {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|image| image.dimensions())
    }

    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, FormatError> {
        check_region(self.level_dimensions(level), level, x, y, width, height)?;
        let image = &self.levels[level];
        Ok(image::imageops::crop_imm(image, x, y, width, height).to_image())
    }
}

// =============================================================================
// SourceOpener
// =============================================================================

/// Opens a [`SlideReader`] for an uploaded file.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn SlideReader>, FormatError>;
}

/// Default opener for files on local disk.
///
/// Tiled TIFF pyramids are read tile by tile; everything else is decoded
/// whole on the blocking pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSourceOpener;

#[async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, path: &Path) -> Result<Arc<dyn SlideReader>, FormatError> {
        if let Some(reader) = TiffSlideReader::open(path).await? {
            return Ok(Arc::new(reader));
        }

        let path = path.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || DecodedImageReader::open(&path))
            .await
            .map_err(|e| FormatError::Decode {
                message: e.to_string(),
            })??;
        Ok(Arc::new(reader))
    }
}

// =============================================================================
// Tests
// =============================================================================
