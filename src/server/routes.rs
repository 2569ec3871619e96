//! Router configuration for the pyramid server.
//!
//! # Route Structure
//!
//! ```text
//! /health                                   - Health check
//! /slides                                   - List slides
//! /slides/{slide_id}                        - Slide metadata
//! /slides/{slide_id}/view                   - Viewing plan / fallback
//! /upload                                   - Multipart upload (POST)
//! /convert/{slide_id}                       - Start conversion (POST)
//! /progress/{slide_id}                      - Conversion progress
//! /dzi/{slide_id}.dzi                       - Deep Zoom descriptor
//! /tiles/{slide_id}/{level}/{col}_{row}.{ext} - Pyramid tile
//! /raw/{filename}                           - Original upload (Range)
//! /delete/{slide_id}                        - Remove slide (DELETE)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wsi_pyramid::server::{create_router, RouterConfig};
//! use wsi_pyramid::service::{ServiceOptions, SlideService};
//!
//! let service = SlideService::open("uploads", "cache", ServiceOptions::default()).await?;
//! service.scan().await?;
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//! let router = create_router(Arc::new(service), config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    convert_handler, delete_handler, dzi_handler, health_handler, progress_handler, raw_handler,
    slide_info_handler, slides_handler, tile_handler, upload_handler, view_handler, AppState,
};
use crate::service::SlideService;

/// Default upload body limit (20GB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Largest accepted upload body in bytes
    pub max_upload_bytes: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration with defaults:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Tracing is enabled
    /// - Uploads up to 20GB
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Set the upload body limit in bytes.
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Upload limit as accepted by the body-limit layer, saturating on
    /// targets whose address space is smaller than the configured limit.
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX)
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router with CORS and (optionally) request tracing.
pub fn create_router(service: Arc<SlideService>, config: RouterConfig) -> Router {
    let app_state = AppState::with_cache_max_age(service, config.cache_max_age);
    let cors = build_cors_layer(&config);

    // Only the upload route may exceed axum's default body limit
    let upload_routes = Router::new()
        .route("/upload", post(upload_handler))
        .layer(DefaultBodyLimit::max(config.body_limit()));

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/slides", get(slides_handler))
        .route("/slides/{slide_id}", get(slide_info_handler))
        .route("/slides/{slide_id}/view", get(view_handler))
        .route("/convert/{slide_id}", post(convert_handler))
        .route("/progress/{slide_id}", get(progress_handler))
        .route("/dzi/{file}", get(dzi_handler))
        .route("/tiles/{slide_id}/{level}/{tile}", get(tile_handler))
        .route("/raw/{filename}", get(raw_handler))
        .route("/delete/{slide_id}", delete(delete_handler))
        .merge(upload_routes)
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, RANGE])
        .expose_headers([ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
