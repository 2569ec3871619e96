//! HTTP request handlers for the pyramid server.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /slides` - List slides with their viewing plan
//! - `GET /slides/{slide_id}` - Slide metadata
//! - `GET /slides/{slide_id}/view` - Resolve the viewing strategy
//! - `POST /upload` - Multipart upload (`file` field)
//! - `POST /convert/{slide_id}` - Start or join a conversion
//! - `GET /progress/{slide_id}` - Conversion progress
//! - `GET /dzi/{slide_id}.dzi` - Deep Zoom descriptor
//! - `GET /tiles/{slide_id}/{level}/{col}_{row}.{format}` - Pyramid tile
//! - `GET /raw/{filename}` - Original upload, with Range support
//! - `DELETE /delete/{slide_id}` - Remove a slide

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::convert::{JobHandle, JobSnapshot};
use crate::error::{FormatError, IoError, ProgressError, SlideError, TiffError, TileError};
use crate::format::extension_of;
use crate::io::RangeReader;
use crate::service::{
    dzi_url, PendingUpload, SlideDetails, SlideService, SlideSummary, UploadResult, ViewResolution,
};
use crate::tile::{parse_tile_name, TileFormat};
use crate::viewing::Strategy;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the slide service.
///
/// This is passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SlideService>,

    /// Cache-Control max-age in seconds for tiles and descriptors
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(service: Arc<SlideService>) -> Self {
        Self {
            service,
            cache_max_age: 3600,
        }
    }

    pub fn with_cache_max_age(service: Arc<SlideService>, cache_max_age: u32) -> Self {
        Self {
            service,
            cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{slide_id}/{level}/{tile}` where tile is
/// `{col}_{row}.{format}`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub slide_id: String,

    /// Pyramid level (0 = single pixel, coarsest)
    pub level: u32,

    pub tile: String,
}

/// Query parameters for the view endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ViewQueryParams {
    /// Strategy the viewer already tried without success
    #[serde(default)]
    pub failed: Option<Strategy>,
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_request")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response from the slides list endpoint.
#[derive(Debug, Serialize)]
pub struct SlidesResponse {
    pub slides: Vec<SlideSummary>,
}

/// Response from the convert endpoint.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    #[serde(flatten)]
    pub job: JobHandle,

    /// Where the descriptor appears once the first level is ready
    pub dzi_url: String,
}

/// Response from the delete endpoint.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub name: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

type ErrorParts = (StatusCode, &'static str, String);

/// Build the JSON error response, logging by severity:
/// - 5xx at ERROR
/// - 404 at DEBUG (common and expected while a pyramid fills in)
/// - other 4xx at WARN
fn error_response((status, error_type, message): ErrorParts) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else if status.is_client_error() {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let error_response = ErrorResponse::with_status(error_type, message, status);
    (status, Json(error_response)).into_response()
}

fn io_parts(err: &IoError) -> ErrorParts {
    match err {
        IoError::NotFound(path) => (
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Resource not found: {}", path),
        ),
        IoError::RangeOutOfBounds { .. } => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            "range_not_satisfiable",
            err.to_string(),
        ),
        IoError::Storage(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "io_error",
            format!("I/O error: {}", msg),
        ),
    }
}

fn format_parts(err: &FormatError) -> ErrorParts {
    match err {
        // A structure pointing past the end of the file is truncated, not a bad range
        FormatError::Tiff(TiffError::Io(IoError::RangeOutOfBounds { .. })) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_format",
            format!("Truncated TIFF: {}", err),
        ),
        FormatError::Io(io_err) | FormatError::Tiff(TiffError::Io(io_err)) => io_parts(io_err),

        // Structural problems mean the file is not a slide we can read
        FormatError::Tiff(tiff_err) => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_format",
            tiff_err.to_string(),
        ),
        FormatError::UnsupportedFormat { reason } => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_format",
            format!("Unsupported format: {}", reason),
        ),
        FormatError::Decode { message } => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "decode_error",
            format!("Failed to decode image: {}", message),
        ),
        FormatError::RegionOutOfBounds { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "decode_error",
            err.to_string(),
        ),
    }
}

fn tile_parts(err: &TileError) -> ErrorParts {
    match err {
        TileError::SlideNotFound { slide_id } => (
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Slide not found: {}", slide_id),
        ),
        TileError::NotFound { .. } => (StatusCode::NOT_FOUND, "tile_not_found", err.to_string()),
        TileError::DescriptorNotFound { .. } => (
            StatusCode::NOT_FOUND,
            "descriptor_not_found",
            err.to_string(),
        ),
        TileError::CorruptCache { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "corrupt_cache",
            err.to_string(),
        ),
        TileError::InvalidLevel { level, level_count } => (
            StatusCode::BAD_REQUEST,
            "invalid_level",
            format!(
                "Invalid level: {} (pyramid has {} levels, valid range: 0-{})",
                level,
                level_count,
                level_count.saturating_sub(1)
            ),
        ),
        TileError::TileOutOfBounds { .. } => (
            StatusCode::BAD_REQUEST,
            "tile_out_of_bounds",
            err.to_string(),
        ),
        TileError::InvalidFormat { format } => (
            StatusCode::BAD_REQUEST,
            "invalid_format",
            format!("Invalid tile format: {}", format),
        ),
        TileError::Io(io_err) => io_parts(io_err),
        TileError::EncodeError { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encode_error",
            format!("Failed to encode tile: {}", message),
        ),
    }
}

fn slide_parts(err: &SlideError) -> ErrorParts {
    match err {
        SlideError::NotFound { slide_id } => (
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Slide not found: {}", slide_id),
        ),
        SlideError::InvalidName { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_name", err.to_string())
        }
        SlideError::UnsupportedExtension { .. } => (
            StatusCode::BAD_REQUEST,
            "unsupported_extension",
            err.to_string(),
        ),
        SlideError::UploadTooLarge => (
            StatusCode::PAYLOAD_TOO_LARGE,
            "upload_too_large",
            err.to_string(),
        ),
        SlideError::InvalidUpload { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_upload", err.to_string())
        }
        SlideError::ViewUnavailable { .. } => {
            (StatusCode::NOT_FOUND, "view_unavailable", err.to_string())
        }
        SlideError::Tile(tile_err) => tile_parts(tile_err),
        SlideError::Format(format_err) => format_parts(format_err),
        SlideError::Io(io_err) => io_parts(io_err),
    }
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        error_response(tile_parts(&self))
    }
}

impl IntoResponse for SlideError {
    fn into_response(self) -> Response {
        error_response(slide_parts(&self))
    }
}

fn progress_parts(err: &ProgressError) -> ErrorParts {
    match err {
        ProgressError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        // Only the converter writes progress; a stale run never reaches a handler
        ProgressError::Superseded { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        ),
    }
}

impl IntoResponse for ProgressError {
    fn into_response(self) -> Response {
        error_response(progress_parts(&self))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List every slide with its flags and viewing plan.
///
/// ```json
/// {
///   "slides": [
///     {"name": "CMU-1", "filename": "CMU-1.svs", "size": 177552579,
///      "converted": false, "viewable": false,
///      "strategy": "direct", "fallback": "pyramid"}
///   ]
/// }
/// ```
pub async fn slides_handler(State(state): State<AppState>) -> Json<SlidesResponse> {
    Json(SlidesResponse {
        slides: state.service.list().await,
    })
}

/// Slide record, metadata and viewing plan.
///
/// # Response
///
/// - `200 OK`: slide details
/// - `404 Not Found`: unknown slide
/// - `415 Unsupported Media Type`: metadata could not be read
pub async fn slide_info_handler(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
) -> Result<Json<SlideDetails>, SlideError> {
    Ok(Json(state.service.info(&slide_id).await?))
}

/// Resolve the viewing strategy, optionally after a failed attempt.
///
/// `GET /slides/{slide_id}/view?failed=direct` returns the fallback, or
/// `404` when viewing has failed for good.
pub async fn view_handler(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
    Query(query): Query<ViewQueryParams>,
) -> Result<Json<ViewResolution>, SlideError> {
    let resolution = state.service.view(&slide_id, query.failed).await?;
    if query.failed.is_some() {
        info!(
            slide_id = %slide_id,
            strategy = resolution.strategy.as_str(),
            "Viewer falling back"
        );
    }
    Ok(Json(resolution))
}

/// Accept a multipart upload.
///
/// The `file` part is streamed to a temporary file, inspected, then
/// published. Other parts are ignored.
///
/// # Response
///
/// - `200 OK`: `{success, filename, name, info}`
/// - `400 Bad Request`: missing file part or extension not accepted
/// - `413 Payload Too Large`: body limit exceeded
/// - `415 Unsupported Media Type`: contents are not a readable image
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResult>, SlideError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| SlideError::InvalidUpload {
                message: "No selected file".to_string(),
            })?;

        let mut pending = state.service.begin_upload(&filename).await?;
        if let Err(e) = receive(field, &mut pending).await {
            pending.abort().await;
            return Err(e);
        }
        debug!(filename = pending.filename(), bytes = pending.written(), "Upload received");

        return Ok(Json(state.service.finish_upload(pending).await?));
    }

    Err(SlideError::InvalidUpload {
        message: "No file part".to_string(),
    })
}

async fn receive(mut field: Field<'_>, pending: &mut PendingUpload) -> Result<(), SlideError> {
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        pending.write(&chunk).await?;
    }
    Ok(())
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> SlideError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        SlideError::UploadTooLarge
    } else {
        SlideError::InvalidUpload {
            message: err.body_text(),
        }
    }
}

/// Start a conversion, or join the one already running.
///
/// Returns immediately with the job snapshot and the descriptor URL.
pub async fn convert_handler(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
) -> Result<Json<ConvertResponse>, SlideError> {
    let job = state.service.convert(&slide_id).await?;
    Ok(Json(ConvertResponse {
        job,
        dzi_url: dzi_url(&slide_id),
    }))
}

/// Conversion progress.
///
/// `404` if no job was ever started for the slide and no pyramid exists.
pub async fn progress_handler(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
) -> Result<Json<JobSnapshot>, ProgressError> {
    Ok(Json(state.service.progress(&slide_id).await?))
}

/// Deep Zoom descriptor as XML.
///
/// `404` until the coarsest level has been cached.
pub async fn dzi_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, TileError> {
    let slide_id = file.strip_suffix(".dzi").unwrap_or(&file);
    let descriptor = state.service.descriptor(slide_id).await?;

    // Partial pyramids keep changing, so only complete ones are cacheable
    let cache_control = if descriptor.complete {
        format!("public, max-age={}", state.cache_max_age)
    } else {
        "no-cache".to_string()
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (header::CACHE_CONTROL, cache_control),
        ],
        descriptor.to_dzi_xml(),
    )
        .into_response())
}

/// Serve one pyramid tile.
///
/// # Response
///
/// - `200 OK`: tile bytes with the format's content type
/// - `400 Bad Request`: malformed name, wrong format, level or grid position
/// - `404 Not Found`: slide unknown or tile not generated yet
/// - `500 Internal Server Error`: tile missing from a ready level
pub async fn tile_handler(
    State(state): State<AppState>,
    Path(params): Path<TilePathParams>,
) -> Result<Response, TileError> {
    let (col, row, ext) = parse_tile_name(&params.tile).ok_or_else(|| TileError::InvalidFormat {
        format: params.tile.clone(),
    })?;
    let format = TileFormat::from_extension(ext).ok_or_else(|| TileError::InvalidFormat {
        format: ext.to_string(),
    })?;

    let data = state
        .service
        .tile(&params.slide_id, params.level, col, row, format)
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CACHE_CONTROL,
                format!("public, max-age={}", state.cache_max_age),
            ),
        ],
        data,
    )
        .into_response())
}

/// Stream an original upload.
///
/// Supports a single `Range: bytes=...` request header, answering `206`
/// with `Content-Range`, or `416` if the range cannot be satisfied.
pub async fn raw_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, SlideError> {
    let reader = state.service.open_raw(&filename).await?;
    let size = reader.size();
    let content_type = raw_content_type(&filename);

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_byte_range(v, size))
        .unwrap_or(ByteRange::Full);

    let (status, offset, len) = match range {
        ByteRange::Full => (StatusCode::OK, 0, size),
        ByteRange::Partial { start, end } => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
        ByteRange::Unsatisfiable => {
            debug!(filename = %filename, size, "Unsatisfiable range");
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{}", size))],
            )
                .into_response());
        }
    };

    let stream = reader.stream_range(offset, len).await?;
    let mut response = (
        status,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response();

    if status == StatusCode::PARTIAL_CONTENT {
        let value = format!("bytes {}-{}/{}", offset, offset + len - 1, size);
        if let Ok(value) = value.parse() {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}

/// Remove a slide, its pyramid and its upload.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
) -> Result<Json<DeleteResponse>, SlideError> {
    let record = state.service.delete(&slide_id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        name: record.name,
    }))
}

// =============================================================================
// Range Parsing
// =============================================================================

/// Outcome of interpreting a `Range` header against a resource size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send the whole resource
    Full,

    /// Inclusive byte span
    Partial { start: u64, end: u64 },

    /// Syntactically valid but outside the resource
    Unsatisfiable,
}

/// Parse a `Range` header value.
///
/// Only the first range of a multi-range request is honored. Malformed
/// values are ignored, as if no header had been sent.
pub fn parse_byte_range(value: &str, size: u64) -> ByteRange {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    let first = spec.split(',').next().unwrap_or("").trim();
    let Some((start, end)) = first.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix form: the last N bytes
        let Ok(suffix) = end.parse::<u64>() else {
            return ByteRange::Full;
        };
        if suffix == 0 || size == 0 {
            return ByteRange::Unsatisfiable;
        }
        return ByteRange::Partial {
            start: size.saturating_sub(suffix),
            end: size - 1,
        };
    }

    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end.is_empty() {
        size.saturating_sub(1)
    } else {
        match end.parse::<u64>() {
            Ok(end) if end >= start => end.min(size.saturating_sub(1)),
            _ => return ByteRange::Full,
        }
    };

    if start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial { start, end }
}

fn raw_content_type(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("svs" | "tif" | "tiff") => "image/tiff",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
