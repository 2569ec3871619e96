//! HTTP API tests: uploads, listing, metadata, raw streaming, viewing
//! strategy and deletion.

use axum::body::Body;
use http::{header, Request, StatusCode};

use wsi_pyramid::tile::{PyramidDescriptor, PyramidLayout, TileFormat};

use super::test_utils::*;

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_unknown_route_404() {
    let app = TestApp::new().await;
    let response = app.get("/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_registers_slide() {
    let app = TestApp::new().await;

    let json = app.upload_ok("sample.png", &png_bytes(40, 30)).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["filename"], "sample.png");
    assert_eq!(json["name"], "sample");
    assert_eq!(json["info"]["width"], 40);
    assert_eq!(json["info"]["height"], 30);
    assert_eq!(json["info"]["level_count"], 1);

    assert!(app.upload_dir().join("sample.png").exists());

    let listing = body_json(app.get("/slides").await).await;
    let slides = listing["slides"].as_array().unwrap();
    assert_eq!(slides.len(), 1);
    assert_eq!(slides[0]["name"], "sample");
    assert_eq!(slides[0]["converted"], false);
    assert_eq!(slides[0]["viewable"], false);
    assert_eq!(slides[0]["strategy"], "direct");
    assert_eq!(slides[0]["fallback"], "pyramid");
}

#[tokio::test]
async fn test_upload_sanitizes_filename() {
    let app = TestApp::new().await;

    let json = app.upload_ok("../my slide.png", &png_bytes(8, 8)).await;
    assert_eq!(json["filename"], "my_slide.png");
    assert_eq!(json["name"], "my_slide");
    assert!(app.upload_dir().join("my_slide.png").exists());
}

#[tokio::test]
async fn test_upload_rejects_extension() {
    let app = TestApp::new().await;

    let response = app.upload("notes.txt", b"hello").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "unsupported_extension");
    assert_eq!(json["status"], 400);

    let listing = body_json(app.get("/slides").await).await;
    assert!(listing["slides"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_rejects_unreadable_content() {
    let app = TestApp::new().await;

    let response = app.upload("fake.svs", b"definitely not a slide").await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let listing = body_json(app.get("/slides").await).await;
    assert!(listing["slides"].as_array().unwrap().is_empty());

    // Neither the upload nor its temporary file survive
    let leftovers = std::fs::read_dir(app.upload_dir()).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_upload_without_file_part() {
    let app = TestApp::new().await;

    let (content_type, body) = multipart_body("attachment", "sample.png", &png_bytes(8, 8));
    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/upload")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_upload");
}

#[tokio::test]
async fn test_upload_replaces_existing_slide() {
    let app = TestApp::new().await;

    app.upload_ok("sample.png", &png_bytes(30, 20)).await;
    let json = app.upload_ok("sample.png", &png_bytes(50, 40)).await;
    assert_eq!(json["info"]["width"], 50);

    let listing = body_json(app.get("/slides").await).await;
    let slides = listing["slides"].as_array().unwrap();
    assert_eq!(slides.len(), 1);

    let info = body_json(app.get("/slides/sample").await).await;
    assert_eq!(info["metadata"]["width"], 50);
}

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_slide_info() {
    let app = TestApp::new().await;
    app.upload_ok("scan.tif", &tiff_bytes(24, 18)).await;

    let response = app.get("/slides/scan").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["name"], "scan");
    assert_eq!(json["filename"], "scan.tif");
    assert_eq!(json["metadata"]["format"], "Generic TIFF");
    assert_eq!(json["metadata"]["width"], 24);
    assert_eq!(json["strategy"], "direct");
    assert_eq!(json["fallback"], "pyramid");
}

#[tokio::test]
async fn test_slide_info_unknown_404() {
    let app = TestApp::new().await;

    let response = app.get("/slides/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

// =============================================================================
// Raw Streaming
// =============================================================================

#[tokio::test]
async fn test_raw_full_body() {
    let app = TestApp::new().await;
    let data = tiff_bytes(24, 18);
    app.upload_ok("scan.tif", &data).await;

    let response = app.get("/raw/scan.tif").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/tiff");
    assert_eq!(
        response.headers().get(header::CONTENT_LENGTH).unwrap(),
        &data.len().to_string()
    );

    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), data.as_slice());
}

#[tokio::test]
async fn test_raw_range_request() {
    let app = TestApp::new().await;
    let data = tiff_bytes(24, 18);
    app.upload_ok("scan.tif", &data).await;

    let response = app
        .send(
            Request::builder()
                .uri("/raw/scan.tif")
                .header(header::RANGE, "bytes=4-13")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes 4-13/{}", data.len())
    );

    let body = body_bytes(response).await;
    assert_eq!(body.as_ref(), &data[4..14]);
}

#[tokio::test]
async fn test_raw_range_unsatisfiable() {
    let app = TestApp::new().await;
    let data = tiff_bytes(24, 18);
    app.upload_ok("scan.tif", &data).await;

    let response = app
        .send(
            Request::builder()
                .uri("/raw/scan.tif")
                .header(header::RANGE, format!("bytes={}-", data.len()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes */{}", data.len())
    );
}

#[tokio::test]
async fn test_raw_unregistered_file_404() {
    let app = TestApp::new().await;

    let response = app.get("/raw/other.tif").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Viewing Strategy
// =============================================================================

#[tokio::test]
async fn test_view_streamable_defaults_to_direct() {
    let app = TestApp::new().await;
    app.upload_ok("scan.tif", &tiff_bytes(24, 18)).await;

    let json = body_json(app.get("/slides/scan/view").await).await;
    assert_eq!(json["slide_id"], "scan");
    assert_eq!(json["strategy"], "direct");
    assert_eq!(json["fallback"], "pyramid");
    assert_eq!(json["url"], "/raw/scan.tif");
}

#[tokio::test]
async fn test_view_direct_failure_without_pyramid_is_terminal() {
    let app = TestApp::new().await;
    app.upload_ok("scan.tif", &tiff_bytes(24, 18)).await;

    let response = app.get("/slides/scan/view?failed=direct").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "view_unavailable");
}

#[tokio::test]
async fn test_view_direct_failure_falls_back_to_pyramid() {
    let app = TestApp::new().await;
    app.upload_ok("scan.tif", &tiff_bytes(24, 18)).await;

    // Coarsest levels published, conversion still under way
    let (_, gate) = app.service.registry().get_with_gate("scan").await.unwrap();
    let layout = PyramidLayout::new(24, 18, TILE_SIZE, 1);
    let descriptor = PyramidDescriptor::for_layout(&layout, TileFormat::Png, 1);
    app.service
        .tiles()
        .publish_descriptor(&gate, "scan", &descriptor)
        .await
        .unwrap();

    let response = app.get("/slides/scan/view?failed=direct").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["strategy"], "pyramid");
    assert!(json["fallback"].is_null());
    assert_eq!(json["url"], "/dzi/scan.dzi");

    // Pyramid failing as well leaves nothing
    let response = app.get("/slides/scan/view?failed=pyramid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_view_converted_raster_uses_pyramid() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    app.post("/convert/sample").await;
    let seen = app.wait_for_job("sample").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");

    let json = body_json(app.get("/slides/sample/view").await).await;
    assert_eq!(json["strategy"], "pyramid");
    assert!(json["fallback"].is_null());
    assert_eq!(json["url"], "/dzi/sample.dzi");
}

#[tokio::test]
async fn test_view_invalid_failed_param_400() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(8, 8)).await;

    let response = app.get("/slides/sample/view?failed=sideways").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_removes_slide() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;
    app.post("/convert/sample").await;
    app.wait_for_job("sample").await;

    let response = app.delete("/delete/sample").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["name"], "sample");

    assert_eq!(app.get("/slides/sample").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/progress/sample").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/dzi/sample.dzi").await.status(), StatusCode::NOT_FOUND);
    assert!(!app.upload_dir().join("sample.png").exists());
    assert!(!app.cache_dir().join("sample_files").exists());

    let listing = body_json(app.get("/slides").await).await;
    assert!(listing["slides"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_unknown_404() {
    let app = TestApp::new().await;
    let response = app.delete("/delete/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
