//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /upload  /convert  /progress  /dzi  /tiles  /raw  /slides     │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error JSON)   │  │  (router config, CORS)      │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                │
//!                          SlideService
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    parse_byte_range, AppState, ByteRange, ConvertResponse, DeleteResponse, ErrorResponse,
    HealthResponse, SlidesResponse, TilePathParams, ViewQueryParams,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
