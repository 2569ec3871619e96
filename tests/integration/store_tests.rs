//! Tile store behavior through the API: address validation, cache headers,
//! corrupt-cache detection and recovery of pyramids after a restart.

use std::sync::Arc;

use http::StatusCode;

use wsi_pyramid::tile::{PyramidDescriptor, PyramidLayout, TileFormat};
use wsi_pyramid::{create_router, RouterConfig, SlideService};

use super::test_utils::*;

async fn converted_app() -> TestApp {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;
    app.post("/convert/sample").await;
    let seen = app.wait_for_job("sample").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");
    app
}

/// Service and router over an existing app's directories, as after a restart.
async fn reopen(app: &TestApp) -> (Arc<SlideService>, axum::Router) {
    let service = SlideService::open(app.upload_dir(), app.cache_dir(), test_options())
        .await
        .unwrap();
    service.scan().await.unwrap();
    let service = Arc::new(service);
    let router = create_router(service.clone(), RouterConfig::new().with_tracing(false));
    (service, router)
}

// =============================================================================
// Tile Reads
// =============================================================================

#[tokio::test]
async fn test_repeated_tile_reads_are_identical() {
    let app = converted_app().await;

    let first = app.get("/tiles/sample/6/1_1.png").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(
        first.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    let first = body_bytes(first).await;

    // Second read is served from the LRU, third from disk
    let second = body_bytes(app.get("/tiles/sample/6/1_1.png").await).await;
    app.service.tiles().cache().clear().await;
    let third = body_bytes(app.get("/tiles/sample/6/1_1.png").await).await;

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert!(image::load_from_memory(&first).is_ok());
}

#[tokio::test]
async fn test_tile_address_validation() {
    let app = converted_app().await;

    // 40x30 at the finest level is 3 x 2 tiles
    let cases = [
        ("/tiles/sample/6/3_0.png", "tile_out_of_bounds"),
        ("/tiles/sample/6/0_2.png", "tile_out_of_bounds"),
        ("/tiles/sample/7/0_0.png", "invalid_level"),
        ("/tiles/sample/6/0_0.jpg", "invalid_format"),
        ("/tiles/sample/6/0_0.webp", "invalid_format"),
        ("/tiles/sample/6/zero.png", "invalid_format"),
    ];

    for (uri, error) in cases {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        let json = body_json(response).await;
        assert_eq!(json["error"], error, "{}", uri);
    }
}

#[tokio::test]
async fn test_tile_unknown_slide_404() {
    let app = TestApp::new().await;

    let response = app.get("/tiles/missing/0/0_0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn test_missing_tile_in_ready_level_is_corrupt_cache() {
    let app = converted_app().await;

    let tile_path = app.cache_dir().join("sample_files").join("6").join("2_1.png");
    assert!(tile_path.exists());
    std::fs::remove_file(&tile_path).unwrap();
    app.service.tiles().cache().clear().await;

    let response = app.get("/tiles/sample/6/2_1.png").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["error"], "corrupt_cache");
}

#[tokio::test]
async fn test_levels_beyond_ready_are_not_found() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let (_, gate) = app.service.registry().get_with_gate("sample").await.unwrap();
    let layout = PyramidLayout::new(40, 30, TILE_SIZE, 1);
    let descriptor = PyramidDescriptor::for_layout(&layout, TileFormat::Png, 2);
    app.service
        .tiles()
        .publish_descriptor(&gate, "sample", &descriptor)
        .await
        .unwrap();

    let response = app.get("/tiles/sample/3/0_0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "tile_not_found");

    // Partial descriptors must not be cached by clients
    let response = app.get("/dzi/sample.dzi").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
}

#[tokio::test]
async fn test_complete_descriptor_is_cacheable() {
    let app = converted_app().await;

    let response = app.get("/dzi/sample.dzi").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
}

// =============================================================================
// Restart Recovery
// =============================================================================

#[tokio::test]
async fn test_restart_recovers_complete_pyramid() {
    let app = converted_app().await;
    let before = body_bytes(app.get("/tiles/sample/6/0_0.png").await).await;

    let (service, router) = reopen(&app).await;
    let record = service.registry().get("sample").await.unwrap();
    assert!(record.converted);
    assert!(record.viewable);

    let progress = service.progress("sample").await.unwrap();
    assert_eq!(progress.status.as_str(), "complete");
    assert_eq!(progress.progress, 100.0);

    let restarted = TestApp {
        dir: tempfile::tempdir().unwrap(),
        service,
        router,
    };
    let after = restarted.get("/tiles/sample/6/0_0.png").await;
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(body_bytes(after).await, before);
}

#[tokio::test]
async fn test_restart_reports_interrupted_conversion() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let (_, gate) = app.service.registry().get_with_gate("sample").await.unwrap();
    let layout = PyramidLayout::new(40, 30, TILE_SIZE, 1);
    let descriptor = PyramidDescriptor::for_layout(&layout, TileFormat::Png, 3);
    app.service
        .tiles()
        .publish_descriptor(&gate, "sample", &descriptor)
        .await
        .unwrap();

    let (service, _router) = reopen(&app).await;
    let record = service.registry().get("sample").await.unwrap();
    assert!(record.viewable);
    assert!(!record.converted);

    let progress = service.progress("sample").await.unwrap();
    assert_eq!(progress.status.as_str(), "failed");
    assert!(progress.progress > 0.0 && progress.progress < 100.0);
    assert!(progress.error.is_some());

    let summary = service.list().await;
    assert_eq!(summary[0].plan.strategy.as_str(), "pyramid");
}

#[tokio::test]
async fn test_scan_skips_unsupported_files() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(8, 8)).await;
    std::fs::write(app.upload_dir().join("notes.txt"), b"hello").unwrap();

    let (service, _router) = reopen(&app).await;
    let names: Vec<_> = service.list().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["sample".to_string()]);
}
