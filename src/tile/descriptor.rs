//! Pyramid descriptor.
//!
//! The descriptor is the document a viewer needs before it can address
//! tiles. It is persisted next to the tiles as JSON, which also records how
//! far conversion got, and rendered to Deep Zoom XML on request.

use serde::{Deserialize, Serialize};

use super::dzi::PyramidLayout;
use super::encoder::TileFormat;

/// Persisted pyramid descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidDescriptor {
    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Tile edge length in pixels, excluding overlap
    pub tile_size: u32,

    /// Overlap between adjacent tiles in pixels
    pub overlap: u32,

    /// Tile encoding
    pub format: TileFormat,

    /// Total number of levels
    pub level_count: u32,

    /// Number of leading (coarsest) levels whose tiles are all cached
    pub levels_ready: u32,

    /// Whether every level is cached
    pub complete: bool,
}

impl PyramidDescriptor {
    /// Descriptor for a layout with `levels_ready` leading levels cached.
    pub fn for_layout(layout: &PyramidLayout, format: TileFormat, levels_ready: u32) -> Self {
        let level_count = layout.level_count();
        let levels_ready = levels_ready.min(level_count);
        Self {
            width: layout.width(),
            height: layout.height(),
            tile_size: layout.tile_size(),
            overlap: layout.overlap(),
            format,
            level_count,
            levels_ready,
            complete: levels_ready == level_count,
        }
    }

    /// Rebuild the geometry this descriptor describes.
    pub fn layout(&self) -> PyramidLayout {
        PyramidLayout::new(self.width, self.height, self.tile_size, self.overlap)
    }

    /// Whether `level` is fully cached.
    pub fn is_level_ready(&self, level: u32) -> bool {
        level < self.levels_ready
    }

    /// Render as a Deep Zoom `.dzi` document.
    ///
    /// # Example Output
    ///
    /// ```xml
    /// <?xml version="1.0" encoding="UTF-8"?>
    /// <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
    ///        TileSize="254"
    ///        Overlap="1"
    ///        Format="jpeg">
    ///   <Size Width="46920" Height="33600" />
    /// </Image>
    /// ```
    pub fn to_dzi_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{tile_size}"
       Overlap="{overlap}"
       Format="{format}">
  <Size Width="{width}" Height="{height}" />
</Image>"#,
            tile_size = self.tile_size,
            overlap = self.overlap,
            format = self.format.extension(),
            width = self.width,
            height = self.height,
        )
    }
}
