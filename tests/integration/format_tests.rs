//! Format inspection edge cases: byte order, BigTIFF, Aperio metadata,
//! pyramid directory counting and malformed input.

use http::StatusCode;

use wsi_pyramid::{inspect, FormatError};

use super::test_utils::*;

fn write_temp(name: &str, data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    (dir, path)
}

// =============================================================================
// Aperio SVS
// =============================================================================

#[tokio::test]
async fn test_inspect_aperio_little_endian() {
    let (_dir, path) = write_temp("slide.svs", &aperio_svs(Endian::Little));

    let metadata = inspect(&path).await.unwrap();
    assert_eq!(metadata.format, "Aperio SVS");
    assert_eq!((metadata.width, metadata.height), (4096, 3072));
    assert_eq!(metadata.vendor.as_deref(), Some("aperio"));
    assert_eq!(metadata.objective_power, Some(20.0));
    assert_eq!(metadata.mpp, Some(0.499));
    // Thumbnail and label are stripped and do not count
    assert_eq!(metadata.level_count, 3);
}

#[tokio::test]
async fn test_inspect_aperio_big_endian() {
    let (_dir, path) = write_temp("slide.svs", &aperio_svs(Endian::Big));

    let metadata = inspect(&path).await.unwrap();
    assert_eq!(metadata.format, "Aperio SVS");
    assert_eq!((metadata.width, metadata.height), (4096, 3072));
    assert_eq!(metadata.mpp, Some(0.499));
    assert_eq!(metadata.level_count, 3);
}

#[tokio::test]
async fn test_inspect_aperio_bigtiff() {
    let data = TiffBuilder::new(Endian::Little)
        .bigtiff()
        .directory(TestDirectory::tiled(50000, 40000, 512).with_description(APERIO_DESCRIPTION))
        .directory(TestDirectory::tiled(12500, 10000, 512).reduced())
        .build();
    let (_dir, path) = write_temp("big.svs", &data);

    let metadata = inspect(&path).await.unwrap();
    assert_eq!(metadata.format, "Aperio SVS");
    // ImageLength is written as SHORT, so stay within u16
    assert_eq!((metadata.width, metadata.height), (50000, 40000));
    assert_eq!(metadata.level_count, 2);
    assert_eq!(metadata.file_size, data.len() as u64);
}

// =============================================================================
// Generic TIFF
// =============================================================================

#[tokio::test]
async fn test_inspect_generic_tiled_tiff() {
    let data = TiffBuilder::new(Endian::Big)
        .directory(TestDirectory::tiled(2048, 1024, 256))
        .directory(TestDirectory::tiled(1024, 512, 256).reduced())
        .build();
    let (_dir, path) = write_temp("pyramid.tif", &data);

    let metadata = inspect(&path).await.unwrap();
    assert_eq!(metadata.format, "Generic TIFF");
    assert_eq!(metadata.vendor, None);
    assert_eq!(metadata.mpp, None);
    assert_eq!(metadata.level_count, 2);
}

#[tokio::test]
async fn test_inspect_stripped_tiff_has_one_level() {
    let (_dir, path) = write_temp("flat.tif", &tiff_bytes(24, 18));

    let metadata = inspect(&path).await.unwrap();
    assert_eq!(metadata.format, "Generic TIFF");
    assert_eq!((metadata.width, metadata.height), (24, 18));
    assert_eq!(metadata.level_count, 1);
}

#[tokio::test]
async fn test_inspect_survives_directory_cycle() {
    // One directory whose next pointer leads back to itself
    let mut data = TiffBuilder::new(Endian::Little)
        .directory(TestDirectory::tiled(640, 480, 256))
        .build();
    let next_at = data.len() - 4;
    data[next_at..].copy_from_slice(&8u32.to_le_bytes());
    let (_dir, path) = write_temp("loop.tif", &data);

    let metadata = inspect(&path).await.unwrap();
    assert_eq!((metadata.width, metadata.height), (640, 480));
    assert_eq!(metadata.level_count, 1);
}

// =============================================================================
// Rasters
// =============================================================================

#[tokio::test]
async fn test_inspect_rasters() {
    let (_png_dir, png) = write_temp("a.png", &png_bytes(31, 7));
    let metadata = inspect(&png).await.unwrap();
    assert_eq!(metadata.format, "Raster image");
    assert_eq!((metadata.width, metadata.height), (31, 7));
    assert_eq!(metadata.level_count, 1);

    let (_jpg_dir, jpg) = write_temp("a.jpg", &jpeg_bytes(12, 9));
    let metadata = inspect(&jpg).await.unwrap();
    assert_eq!((metadata.width, metadata.height), (12, 9));
}

// =============================================================================
// Malformed Input
// =============================================================================

#[tokio::test]
async fn test_inspect_rejects_unknown_content() {
    let (_dir, path) = write_temp("junk.svs", b"this is not an image at all");

    let result = inspect(&path).await;
    assert!(matches!(result, Err(FormatError::UnsupportedFormat { .. })));
}

#[tokio::test]
async fn test_inspect_rejects_truncated_tiff() {
    let data = aperio_svs(Endian::Little);
    let (_dir, path) = write_temp("cut.svs", &data[..24]);

    assert!(inspect(&path).await.is_err());
}

#[tokio::test]
async fn test_inspect_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = inspect(&dir.path().join("absent.svs")).await;
    assert!(matches!(result, Err(FormatError::Io(_))));
}

// =============================================================================
// Through the API
// =============================================================================

#[tokio::test]
async fn test_upload_svs_exposes_metadata() {
    let app = TestApp::new().await;

    let json = app.upload_ok("CMU-1.svs", &aperio_svs(Endian::Little)).await;
    assert_eq!(json["name"], "CMU-1");
    assert_eq!(json["info"]["vendor"], "aperio");
    assert_eq!(json["info"]["objective_power"], 20.0);
    assert_eq!(json["info"]["level_count"], 3);

    let info = body_json(app.get("/slides/CMU-1").await).await;
    assert_eq!(info["metadata"]["mpp"], 0.499);
    assert_eq!(info["strategy"], "direct");

    let view = body_json(app.get("/slides/CMU-1/view").await).await;
    assert_eq!(view["url"], "/raw/CMU-1.svs");
}

#[tokio::test]
async fn test_upload_truncated_tiff_rejected() {
    let app = TestApp::new().await;
    let data = aperio_svs(Endian::Big);

    let response = app.upload("cut.svs", &data[..24]).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}
