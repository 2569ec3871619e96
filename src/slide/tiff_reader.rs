//! Region reads straight from a tiled TIFF pyramid.
//!
//! [`TiffSlideReader`] exposes every tiled directory that fits the pyramid
//! as a native level. A region read fetches only the tiles it overlaps, with
//! positioned reads, and stitches them together. Nothing close to the full
//! image is ever held in memory.
//!
//! Supported tile storage:
//!
//! - JPEG, including abbreviated streams that share `JPEGTables`
//! - uncompressed 8-bit interleaved gray, RGB and RGBA
//!
//! Anything else makes [`TiffSlideReader::open`] decline the file so the
//! caller can fall back to decoding it whole.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::{ImageFormat, ImageReader, Limits, Rgb, RgbImage};
use lru::LruCache;
use tracing::debug;

use crate::error::{FormatError, IoError};
use crate::format::jpeg::prepare_tile_jpeg;
use crate::format::{is_tiff_header, TileCodec, TiffDirectory, TiffSummary, TileIndex};
use crate::io::{FileRangeReader, RangeReader};

use super::reader::{check_region, SlideReader};

/// Decoded tiles kept per reader. A tile row of a wide level fits.
const DECODED_TILE_CAPACITY: usize = 256;

/// Largest tile edge accepted from a file.
const MAX_TILE_EDGE: u32 = 8192;

/// Background for tiles the file leaves empty.
const EMPTY_TILE: Rgb<u8> = Rgb([255, 255, 255]);

// =============================================================================
// Level Selection
// =============================================================================

/// Whether `downsample` is plausible for the `index`-th pyramid level.
///
/// The base is ~1.0; every other level must sit within 20% of a power of
/// two of at least 2.
fn is_valid_downsample(downsample: f64, index: usize) -> bool {
    if index == 0 {
        return (downsample - 1.0).abs() < 0.1;
    }

    let rounded = downsample.log2().round();
    if rounded < 1.0 {
        return false;
    }

    let ratio = downsample / 2.0_f64.powf(rounded);
    ratio > 0.8 && ratio < 1.2
}

/// Order readable tiled directories largest first and keep those that form a
/// consistent pyramid under the largest.
fn select_levels(directories: &[TiffDirectory]) -> Vec<&TiffDirectory> {
    let mut candidates: Vec<&TiffDirectory> = directories
        .iter()
        .filter(|d| d.tiled && d.has_tile_data() && d.width > 0 && d.height > 0)
        .collect();
    candidates.sort_by_key(|d| std::cmp::Reverse(d.width as u64 * d.height as u64));

    // An unreadable base would shift every level; let the caller decode whole
    match candidates.first() {
        Some(base) if base.is_readable_tiled() => {}
        _ => return Vec::new(),
    }

    let base_w = candidates[0].width as f64;
    let base_h = candidates[0].height as f64;

    let mut levels = Vec::new();
    for dir in candidates {
        let downsample = (base_w / dir.width as f64 + base_h / dir.height as f64) / 2.0;
        // Repeated sizes add nothing
        if levels
            .iter()
            .any(|l: &&TiffDirectory| l.width == dir.width && l.height == dir.height)
        {
            continue;
        }
        if dir.is_readable_tiled() && is_valid_downsample(downsample, levels.len()) {
            levels.push(dir);
        }
    }
    levels
}

// =============================================================================
// TiffSlideReader
// =============================================================================

/// One native level backed by a tiled directory.
#[derive(Debug)]
struct TiledLevel {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    tiles_across: u32,
    codec: TileCodec,
    index: TileIndex,
}

impl TiledLevel {
    fn tile_location(&self, tx: u32, ty: u32) -> Option<(u64, u64)> {
        let i = ty as usize * self.tiles_across as usize + tx as usize;
        Some((*self.index.offsets.get(i)?, *self.index.byte_counts.get(i)?))
    }
}

/// [`SlideReader`] over the tiled directories of a TIFF or SVS file.
pub struct TiffSlideReader {
    identifier: String,
    file: Mutex<File>,
    file_size: u64,
    levels: Vec<TiledLevel>,
    tiles: Mutex<LruCache<(usize, u32, u32), Arc<RgbImage>>>,
}

impl std::fmt::Debug for TiffSlideReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffSlideReader")
            .field("identifier", &self.identifier)
            .field("levels", &self.levels.len())
            .finish()
    }
}

impl TiffSlideReader {
    /// Open `path` if it is a TIFF with a readable tiled pyramid.
    ///
    /// Returns `Ok(None)` for other files, including TIFFs whose tiles use
    /// an unsupported compression.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or its directory chain or tile
    /// index is malformed.
    pub async fn open(path: &Path) -> Result<Option<Self>, FormatError> {
        let reader = FileRangeReader::open(path).await?;
        let head_len = reader.size().min(4) as usize;
        if !is_tiff_header(&reader.read_exact_at(0, head_len).await?) {
            return Ok(None);
        }

        let summary = TiffSummary::read(&reader).await?;
        let selected = select_levels(&summary.directories);
        if selected.is_empty() {
            debug!(file = reader.identifier(), "No readable tiled pyramid");
            return Ok(None);
        }

        let mut levels = Vec::with_capacity(selected.len());
        for dir in selected {
            let index = dir.read_tile_index(&reader, &summary.header).await?;
            match build_level(dir, index)? {
                Some(level) => levels.push(level),
                // Bit depth is only known once the index is read
                None if levels.is_empty() => return Ok(None),
                None => {}
            }
        }

        debug!(
            file = reader.identifier(),
            levels = levels.len(),
            "Opened tiled pyramid"
        );

        let file = File::open(path).map_err(IoError::from)?;
        let capacity = NonZeroUsize::new(DECODED_TILE_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Ok(Some(Self {
            identifier: reader.identifier().to_string(),
            file: Mutex::new(file),
            file_size: reader.size(),
            levels,
            tiles: Mutex::new(LruCache::new(capacity)),
        }))
    }

    /// Tile edge lengths of a level.
    pub fn tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.levels
            .get(level)
            .map(|l| (l.tile_width, l.tile_height))
    }

    fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>, FormatError> {
        if offset.checked_add(len).map_or(true, |end| end > self.file_size) {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len,
                size: self.file_size,
            }
            .into());
        }

        let mut buf = vec![0u8; len as usize];
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset)).map_err(IoError::from)?;
        file.read_exact(&mut buf).map_err(IoError::from)?;
        Ok(buf)
    }

    fn tile(&self, level: usize, tx: u32, ty: u32) -> Result<Arc<RgbImage>, FormatError> {
        let key = (level, tx, ty);
        if let Some(tile) = self
            .tiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(tile.clone());
        }

        let info = &self.levels[level];
        let (offset, len) = info.tile_location(tx, ty).ok_or_else(|| FormatError::Decode {
            message: format!("{}: no tile ({}, {}) at level {}", self.identifier, tx, ty, level),
        })?;

        let tile = if len == 0 {
            RgbImage::from_pixel(info.tile_width, info.tile_height, EMPTY_TILE)
        } else {
            let data = self.read_bytes(offset, len)?;
            decode_tile(info, &data).map_err(|message| FormatError::Decode {
                message: format!(
                    "{}: tile ({}, {}) at level {}: {}",
                    self.identifier, tx, ty, level, message
                ),
            })?
        };

        let tile = Arc::new(tile);
        self.tiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, tile.clone());
        Ok(tile)
    }
}

impl SlideReader for TiffSlideReader {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|l| (l.width, l.height))
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
        let info = &self.levels[level];

        let mut region = RgbImage::from_pixel(width, height, EMPTY_TILE);
        let (first_col, last_col) = (x / info.tile_width, (x + width - 1) / info.tile_width);
        let (first_row, last_row) = (y / info.tile_height, (y + height - 1) / info.tile_height);

        for ty in first_row..=last_row {
            for tx in first_col..=last_col {
                let tile = self.tile(level, tx, ty)?;
                let dx = (tx * info.tile_width) as i64 - x as i64;
                let dy = (ty * info.tile_height) as i64 - y as i64;
                image::imageops::replace(&mut region, &*tile, dx, dy);
            }
        }

        Ok(region)
    }
}

// =============================================================================
// Tile Decoding
// =============================================================================

fn build_level(dir: &TiffDirectory, index: TileIndex) -> Result<Option<TiledLevel>, FormatError> {
    let (Some(tile_width), Some(tile_height), Some(codec)) =
        (dir.tile_width, dir.tile_height, dir.tile_codec())
    else {
        return Ok(None);
    };
    if tile_width > MAX_TILE_EDGE || tile_height > MAX_TILE_EDGE {
        return Ok(None);
    }
    if matches!(codec, TileCodec::Raw { .. }) && index.bits_per_sample != 8 {
        return Ok(None);
    }

    let tiles_across = dir.width.div_ceil(tile_width);
    let tiles_down = dir.height.div_ceil(tile_height);
    let expected = tiles_across as usize * tiles_down as usize;
    if index.offsets.len() < expected || index.byte_counts.len() < expected {
        return Err(FormatError::Decode {
            message: format!(
                "{}x{} directory lists {} tiles, expected {}",
                dir.width,
                dir.height,
                index.offsets.len().min(index.byte_counts.len()),
                expected
            ),
        });
    }

    Ok(Some(TiledLevel {
        width: dir.width,
        height: dir.height,
        tile_width,
        tile_height,
        tiles_across,
        codec,
        index,
    }))
}

fn decode_tile(level: &TiledLevel, data: &[u8]) -> Result<RgbImage, String> {
    match level.codec {
        TileCodec::Jpeg { rgb_components } => {
            let stream =
                prepare_tile_jpeg(level.index.jpeg_tables.as_deref(), data, rgb_components);

            let mut limits = Limits::default();
            limits.max_image_width = Some(MAX_TILE_EDGE);
            limits.max_image_height = Some(MAX_TILE_EDGE);

            let mut reader = ImageReader::with_format(Cursor::new(stream), ImageFormat::Jpeg);
            reader.limits(limits);
            reader
                .decode()
                .map(|image| image.into_rgb8())
                .map_err(|e| e.to_string())
        }
        TileCodec::Raw { samples } => {
            let (w, h) = (level.tile_width, level.tile_height);
            let samples = samples as usize;
            let needed = w as usize * h as usize * samples;
            if data.len() < needed {
                return Err(format!("{} bytes, expected {}", data.len(), needed));
            }

            let rgb: Vec<u8> = match samples {
                3 => data[..needed].to_vec(),
                1 => data[..needed].iter().flat_map(|&v| [v, v, v]).collect(),
                _ => data[..needed]
                    .chunks_exact(samples)
                    .flat_map(|px| [px[0], px[1], px[2]])
                    .collect(),
            };
            RgbImage::from_raw(w, h, rgb).ok_or_else(|| "tile buffer size mismatch".to_string())
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
