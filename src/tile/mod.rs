//! Pyramid tiles: geometry, encoding and storage.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Converter (writes)  │  HTTP (reads)   │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileStore                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  {slide}_files/ │  │
//! │  │  (hot LRU)   │  │  (on disk)      │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`PyramidLayout`]: Deep Zoom level and tile-grid geometry
//! - [`PyramidDescriptor`]: persisted progress plus the `.dzi` document
//! - [`TileEncoder`]: region resize and JPEG/PNG encoding
//! - [`TileCache`]: size-bounded LRU of encoded tiles
//! - [`TileStore`]: gated atomic writes, cached reads, delete

mod cache;
mod descriptor;
mod dzi;
mod encoder;
mod store;

pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use descriptor::PyramidDescriptor;
pub use dzi::{level_dimensions, max_level_for, parse_tile_name, PyramidLayout, PyramidLevel, TileBounds};
pub use encoder::{
    clamp_quality, is_valid_quality, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use store::{TileStore, WriteOutcome, DESCRIPTOR_FILE};
