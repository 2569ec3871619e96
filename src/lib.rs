//! # WSI Pyramid
//!
//! Upload, convert and serve Whole Slide Images (WSI) as Deep Zoom tile
//! pyramids.
//!
//! A slide is uploaded once, inspected, and then either streamed directly
//! from the original file (when the container is natively tiled) or
//! converted in the background into a Deep Zoom pyramid on disk. Clients
//! poll conversion progress and can start viewing as soon as the coarsest
//! level exists.
//!
//! ## Features
//!
//! - **Format inspection**: TIFF/BigTIFF directory walking with ranged reads,
//!   Aperio metadata (objective power, microns per pixel)
//! - **Background conversion**: bounded worker pool, coalesced duplicate
//!   starts, monotonic progress, cooperative cancellation on delete
//! - **Tile store**: atomic tile publish, LRU hot-tile cache, corrupt-cache
//!   detection
//! - **Viewing strategy**: one decision function for direct vs. pyramid
//!   viewing, with a fallback chain
//!
//! ## Architecture
//!
//! - [`io`] - Ranged file reads and atomic file publish
//! - [`mod@format`] - Extension rules, TIFF parsing and inspection
//! - [`slide`] - Slide records, registry, uploads and source decoding
//! - [`tile`] - Deep Zoom geometry, encoding, caching and the tile store
//! - [`convert`] - Background conversion and progress tracking
//! - [`viewing`] - Viewing strategy selection
//! - [`service`] - Operations behind the HTTP API and CLI
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_pyramid::{create_router, RouterConfig, ServiceOptions, SlideService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SlideService::open("uploads", "cache", ServiceOptions::default()).await?;
//!     service.scan().await?;
//!
//!     let router = create_router(Arc::new(service), RouterConfig::new());
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod format;
pub mod io;
pub mod server;
pub mod service;
pub mod slide;
pub mod tile;
pub mod viewing;

// Re-export commonly used types
pub use config::{Cli, Command, ConvertConfig, InspectConfig, PyramidArgs, ServeConfig};
pub use convert::{
    ConvertOptions, Converter, JobHandle, JobSnapshot, JobStatus, ProgressTracker,
    DEFAULT_OVERLAP, DEFAULT_TILE_SIZE, DEFAULT_WORKERS,
};
pub use error::{ConvertError, FormatError, IoError, ProgressError, SlideError, TiffError, TileError};
pub use format::{
    allowed_file, inspect, is_allowed_extension, is_directly_streamable, SlideFormat,
    SlideMetadata,
};
pub use io::{AtomicFile, FileRangeReader, RangeReader};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use service::{ServiceOptions, SlideService, SlideSummary, UploadResult, ViewResolution};
pub use slide::{
    DecodedImageReader, FileSourceOpener, LocalUploadStore, SlideGate, SlideReader, SlideRecord,
    SlideRegistry, SourceOpener, TiffSlideReader, UploadStore,
};
pub use tile::{
    PyramidDescriptor, PyramidLayout, TileCache, TileEncoder, TileFormat, TileStore,
    DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY,
};
pub use viewing::{next_after_failure, select_strategy, Strategy, ViewPlan};
