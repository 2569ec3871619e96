//! Deep Zoom pyramid geometry.
//!
//! Deep Zoom numbers levels from the coarsest up:
//! - level 0 is 1x1 pixel
//! - level `max = ceil(log2(max(width, height)))` is full resolution
//!
//! Level `L` has dimensions `ceil(dim / 2^(max - L))`, and is cut into a grid
//! of `tile_size` tiles. Each tile is extended by `overlap` pixels on every
//! side that has a neighbour, so edge tiles are smaller than interior ones.
//!
//! ```text
//! level 3 (8x6, tile_size 4, overlap 1)
//!
//!   col 0: x 0..5      col 1: x 3..8
//!   ┌─────┬──┬─────┐
//!   │     │▒▒│     │   ▒ = overlap shared by both tiles
//!   └─────┴──┴─────┘
//! ```

use serde::{Deserialize, Serialize};

/// Calculate the maximum Deep Zoom level for given image dimensions.
///
/// Integer form of `ceil(log2(max(width, height)))`.
pub fn max_level_for(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Calculate dimensions at a specific level.
///
/// Returns `(0, 0)` for levels beyond `max_level`.
pub fn level_dimensions(width: u32, height: u32, level: u32, max_level: u32) -> (u32, u32) {
    if level > max_level {
        return (0, 0);
    }

    let shift = max_level - level;
    let scale = 1u64 << shift;
    let w = (width as u64).div_ceil(scale) as u32;
    let h = (height as u64).div_ceil(scale) as u32;

    (w.max(1), h.max(1))
}

/// Pixel rectangle of one tile within its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// PyramidLevel
// =============================================================================

/// One level of a Deep Zoom pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidLevel {
    /// Level index, 0 is the coarsest
    pub index: u32,

    /// Level width in pixels
    pub width: u32,

    /// Level height in pixels
    pub height: u32,

    /// Number of tile columns
    pub cols: u32,

    /// Number of tile rows
    pub rows: u32,
}

impl PyramidLevel {
    pub fn tile_count(&self) -> u64 {
        self.cols as u64 * self.rows as u64
    }

    pub fn contains_tile(&self, col: u32, row: u32) -> bool {
        col < self.cols && row < self.rows
    }
}

// =============================================================================
// PyramidLayout
// =============================================================================

/// Complete geometry of a pyramid for a given image size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLayout {
    width: u32,
    height: u32,
    tile_size: u32,
    overlap: u32,
    levels: Vec<PyramidLevel>,
}

impl PyramidLayout {
    /// Build the layout. `tile_size` must be positive.
    pub fn new(width: u32, height: u32, tile_size: u32, overlap: u32) -> Self {
        let tile_size = tile_size.max(1);
        let max_level = max_level_for(width, height);

        let levels = (0..=max_level)
            .map(|index| {
                let (w, h) = level_dimensions(width, height, index, max_level);
                PyramidLevel {
                    index,
                    width: w,
                    height: h,
                    cols: w.div_ceil(tile_size).max(1),
                    rows: h.div_ceil(tile_size).max(1),
                }
            })
            .collect();

        Self {
            width,
            height,
            tile_size,
            overlap,
            levels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level(&self, index: u32) -> Option<&PyramidLevel> {
        self.levels.get(index as usize)
    }

    pub fn level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Index of the full-resolution level.
    pub fn max_level(&self) -> u32 {
        self.level_count().saturating_sub(1)
    }

    /// Factor by which the full image is reduced at `level`.
    pub fn downsample(&self, level: u32) -> f64 {
        let shift = self.max_level().saturating_sub(level);
        (1u64 << shift) as f64
    }

    /// Total number of tiles over all levels.
    pub fn total_tiles(&self) -> u64 {
        self.levels.iter().map(PyramidLevel::tile_count).sum()
    }

    /// Pixel rectangle of a tile, including overlap.
    ///
    /// Returns `None` for coordinates outside the level's grid.
    pub fn tile_bounds(&self, level: u32, col: u32, row: u32) -> Option<TileBounds> {
        let lvl = self.level(level)?;
        if !lvl.contains_tile(col, row) {
            return None;
        }

        let (x, width) = self.axis_span(col, lvl.width);
        let (y, height) = self.axis_span(row, lvl.height);
        Some(TileBounds {
            x,
            y,
            width,
            height,
        })
    }

    fn axis_span(&self, index: u32, extent: u32) -> (u32, u32) {
        let start = index as u64 * self.tile_size as u64;
        let lead = if index > 0 { self.overlap as u64 } else { 0 };
        let begin = start.saturating_sub(lead);
        let end = (start + self.tile_size as u64 + self.overlap as u64).min(extent as u64);
        (begin as u32, (end - begin) as u32)
    }
}

/// Parse tile coordinates from a path segment like `"3_5.jpeg"`.
///
/// Returns `(col, row, format)`. The format is everything after the last dot.
pub fn parse_tile_name(name: &str) -> Option<(u32, u32, &str)> {
    let (coords, format) = name.rsplit_once('.')?;
    let (col, row) = coords.split_once('_')?;

    let col: u32 = col.parse().ok()?;
    let row: u32 = row.parse().ok()?;
    if format.is_empty() {
        return None;
    }

    Some((col, row, format))
}
