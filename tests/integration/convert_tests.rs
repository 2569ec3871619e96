//! Conversion lifecycle over HTTP: job start and coalescing, progress,
//! incremental availability and deletion while a job runs.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use wsi_pyramid::tile::PyramidLayout;

use super::test_utils::*;

fn slow_app_opener() -> Arc<SlowOpener> {
    Arc::new(SlowOpener {
        delay: Duration::from_millis(4),
    })
}

fn progress_values(seen: &[serde_json::Value]) -> Vec<f64> {
    seen.iter()
        .map(|s| s["progress"].as_f64().unwrap())
        .collect()
}

// =============================================================================
// Progress Before Any Job
// =============================================================================

#[tokio::test]
async fn test_progress_without_job_404() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let response = app.get("/progress/sample").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/progress/never-uploaded").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_convert_unknown_slide_404() {
    let app = TestApp::new().await;

    let response = app.post("/convert/missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/progress/missing").await.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Full Conversion
// =============================================================================

#[tokio::test]
async fn test_convert_builds_full_pyramid() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let response = app.post("/convert/sample").await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["started"], true);
    assert_eq!(job["slide_id"], "sample");
    assert_eq!(job["dzi_url"], "/dzi/sample.dzi");

    let seen = app.wait_for_job("sample").await;
    let last = seen.last().unwrap();
    assert_eq!(last["status"], "complete");
    assert_eq!(last["progress"], 100.0);
    assert!(last.get("error").is_none());

    let progress = progress_values(&seen);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    let response = app.get("/dzi/sample.dzi").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/xml"
    );
    let xml = body_text(response).await;
    assert!(xml.contains(r#"Width="40""#));
    assert!(xml.contains(r#"Height="30""#));
    assert!(xml.contains(r#"TileSize="16""#));
    assert!(xml.contains(r#"Overlap="1""#));
    assert!(xml.contains(r#"Format="png""#));

    let layout = PyramidLayout::new(40, 30, TILE_SIZE, 1);
    let tiles = app.service.tiles().count_tiles("sample").await.unwrap();
    assert_eq!(tiles as u64, layout.total_tiles());

    let listing = body_json(app.get("/slides").await).await;
    let slide = &listing["slides"][0];
    assert_eq!(slide["converted"], true);
    assert_eq!(slide["viewable"], true);
    assert_eq!(slide["strategy"], "pyramid");
    assert!(slide["fallback"].is_null());
}

#[tokio::test]
async fn test_convert_tiff_upload() {
    let app = TestApp::new().await;
    app.upload_ok("scan.tif", &tiff_bytes(33, 17)).await;

    app.post("/convert/scan").await;
    let seen = app.wait_for_job("scan").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");

    // Finest level of a 33x17 image with 16px tiles is 3 x 2 tiles
    let max_level = PyramidLayout::new(33, 17, TILE_SIZE, 1).max_level();
    let response = app.get(&format!("/tiles/scan/{}/2_1.png", max_level)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");

    let tile = image::load_from_memory(&body_bytes(response).await).unwrap();
    // Last column: 33 - 32 = 1 pixel plus 1 pixel of left overlap
    assert_eq!((tile.width(), tile.height()), (2, 2));
}

#[tokio::test]
async fn test_conversion_failure_is_reported() {
    let app = TestApp::new().await;
    // Valid TIFF structure with no pixel data behind it
    app.upload_ok("broken.svs", &aperio_svs(Endian::Little)).await;

    app.post("/convert/broken").await;
    let seen = app.wait_for_job("broken").await;
    let last = seen.last().unwrap();
    assert_eq!(last["status"], "failed");
    assert!(last["error"].as_str().is_some_and(|e| !e.is_empty()));

    // Failure is sticky until the next start
    let again = body_json(app.get("/progress/broken").await).await;
    assert_eq!(again["status"], "failed");
    assert_eq!(again["run"], last["run"]);

    assert_eq!(app.get("/dzi/broken.dzi").await.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Coalescing and Restarts
// =============================================================================

#[tokio::test]
async fn test_duplicate_convert_is_coalesced() {
    let app = TestApp::with_opener(slow_app_opener()).await;
    app.upload_ok("sample.png", &png_bytes(120, 90)).await;

    let (first, second) = tokio::join!(app.post("/convert/sample"), app.post("/convert/sample"));
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);

    let first = body_json(first).await;
    let second = body_json(second).await;

    let (started, coalesced) = match (first["started"] == true, second["started"] == true) {
        (true, false) => (first, second),
        (false, true) => (second, first),
        other => panic!("expected exactly one start, got {:?}", other),
    };
    assert_eq!(started["run"], coalesced["run"]);
    assert_eq!(started["status"], "queued");
    assert_eq!(started["progress"], 0.0);

    // The coalesced answer is the live job's snapshot, not a fresh one
    let status = coalesced["status"].as_str().unwrap();
    assert!(status == "queued" || status == "running", "{}", status);
    let progress = coalesced["progress"].as_f64().unwrap();
    assert!((0.0..100.0).contains(&progress), "{}", progress);

    let seen = app.wait_for_job("sample").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");
    assert_eq!(seen.last().unwrap()["run"], started["run"]);
}

#[tokio::test]
async fn test_restart_after_completion_resets_progress() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let first = body_json(app.post("/convert/sample").await).await;
    app.wait_for_job("sample").await;

    let second = body_json(app.post("/convert/sample").await).await;
    assert_eq!(second["started"], true);
    assert_eq!(second["status"], "queued");
    assert_eq!(second["progress"], 0.0);
    assert!(second["run"].as_u64().unwrap() > first["run"].as_u64().unwrap());

    let seen = app.wait_for_job("sample").await;
    let progress = progress_values(&seen);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(seen.last().unwrap()["status"], "complete");
    assert_eq!(seen.last().unwrap()["run"], second["run"]);
}

// =============================================================================
// Incremental Availability
// =============================================================================

#[tokio::test]
async fn test_descriptor_and_tiles_404_before_conversion() {
    let app = TestApp::new().await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;

    let response = app.get("/dzi/sample.dzi").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/tiles/sample/0/0_0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "tile_not_found");
}

#[tokio::test]
async fn test_viewable_before_complete() {
    // Native level 0 of the 200x150 source only feeds the finest Deep Zoom
    // level, so holding it parks the job just before that level
    let opener = Arc::new(GatedOpener::new(0));
    let app = TestApp::with_opener(opener.clone()).await;
    app.upload_ok("sample.png", &png_bytes(200, 150)).await;
    app.post("/convert/sample").await;

    let max_level = PyramidLayout::new(200, 150, TILE_SIZE, 1).max_level();

    // Descriptor appears once the coarsest level exists
    let mut xml = None;
    for _ in 0..2000 {
        let response = app.get("/dzi/sample.dzi").await;
        if response.status() == StatusCode::OK {
            xml = Some(body_text(response).await);
            break;
        }
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let xml = xml.expect("descriptor never appeared");
    assert!(xml.contains(r#"Width="200""#));
    assert!(xml.contains(r#"Height="150""#));

    let response = app.get("/tiles/sample/0/0_0.png").await;
    assert_eq!(response.status(), StatusCode::OK);

    // The flag follows the descriptor publish
    let mut viewable = false;
    for _ in 0..500 {
        let listing = body_json(app.get("/slides").await).await;
        if listing["slides"][0]["viewable"] == true {
            assert_eq!(listing["slides"][0]["converted"], false);
            viewable = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(viewable);

    // Finest tiles are only served once their level is written
    let finest = format!("/tiles/sample/{}/12_9.png", max_level);
    let response = app.get(&finest).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let progress = body_json(app.get("/progress/sample").await).await;
    assert_eq!(progress["status"], "running");
    assert!(progress["progress"].as_f64().unwrap() < 100.0);

    opener.release();
    let seen = app.wait_for_job("sample").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");
    assert_eq!(app.get(&finest).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failure_mid_run_keeps_coarse_levels() {
    // 40x30 with 16px tiles: levels 0..=4 are one tile each, level 5 has two
    let app = TestApp::with_opener(Arc::new(FailingOpener { succeed: 5 })).await;
    app.upload_ok("sample.png", &png_bytes(40, 30)).await;
    app.post("/convert/sample").await;

    let seen = app.wait_for_job("sample").await;
    let last = seen.last().unwrap();
    assert_eq!(last["status"], "failed");
    assert!(last["error"].as_str().unwrap().contains("corrupt tile data"));

    // What was published before the failure stays available
    assert_eq!(app.get("/tiles/sample/0/0_0.png").await.status(), StatusCode::OK);
    assert_eq!(app.get("/tiles/sample/4/0_0.png").await.status(), StatusCode::OK);
    assert_eq!(
        app.get("/tiles/sample/5/0_0.png").await.status(),
        StatusCode::NOT_FOUND
    );

    let response = app.get("/dzi/sample.dzi").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(r#"Width="40""#));

    let listing = body_json(app.get("/slides").await).await;
    assert_eq!(listing["slides"][0]["viewable"], true);
    assert_eq!(listing["slides"][0]["converted"], false);
}

// =============================================================================
// Delete During Conversion
// =============================================================================

#[tokio::test]
async fn test_delete_during_conversion_leaves_no_tiles() {
    let app = TestApp::with_opener(slow_app_opener()).await;
    app.upload_ok("sample.png", &png_bytes(200, 150)).await;
    app.post("/convert/sample").await;

    // Let a few levels land first
    for _ in 0..2000 {
        if app.get("/dzi/sample.dzi").await.status() == StatusCode::OK {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let response = app.delete("/delete/sample").await;
    assert_eq!(response.status(), StatusCode::OK);

    let slide_dir = app.cache_dir().join("sample_files");
    assert!(!slide_dir.exists());

    // The worker must not resurrect anything after it notices cancellation
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!slide_dir.exists());
    assert_eq!(app.service.tiles().count_tiles("sample").await.unwrap(), 0);

    assert_eq!(app.get("/progress/sample").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.get("/dzi/sample.dzi").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        app.get("/tiles/sample/0/0_0.png").await.status(),
        StatusCode::NOT_FOUND
    );
}
