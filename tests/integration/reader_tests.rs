//! Region reads from real files: tiled TIFF pyramids (uncompressed and
//! abbreviated JPEG tiles), the whole-image fallback and conversion of a
//! tiled upload over HTTP.

use http::StatusCode;
use image::{Rgb, RgbImage};

use wsi_pyramid::slide::{FileSourceOpener, SlideReader, SourceOpener, TiffSlideReader};
use wsi_pyramid::tile::PyramidLayout;

use super::test_utils::*;

fn write_temp(name: &str, data: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    (dir, path)
}

fn close(a: &Rgb<u8>, b: &Rgb<u8>, tolerance: u8) -> bool {
    a.0.iter().zip(b.0.iter()).all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

// =============================================================================
// Tiled TIFF
// =============================================================================

#[tokio::test]
async fn test_tiled_levels() {
    let source = gradient(300, 200);
    let (_dir, path) = write_temp("slide.tif", &tiled_pyramid(&source, 64, 3, TestTiles::raw_rgb));

    let reader = TiffSlideReader::open(&path).await.unwrap().unwrap();
    assert_eq!(reader.level_count(), 3);
    assert_eq!(reader.level_dimensions(0), Some((300, 200)));
    assert_eq!(reader.level_dimensions(1), Some((150, 100)));
    assert_eq!(reader.level_dimensions(2), Some((75, 50)));
    assert_eq!(reader.tile_size(0), Some((64, 64)));
    assert_eq!(reader.best_level_for_downsample(8.0), 2);
}

#[tokio::test]
async fn test_region_across_tile_boundaries() {
    let source = gradient(300, 200);
    let (_dir, path) = write_temp("slide.tif", &tiled_pyramid(&source, 64, 2, TestTiles::raw_rgb));
    let reader = TiffSlideReader::open(&path).await.unwrap().unwrap();

    // Spans four tiles
    let region = reader.read_region(0, 50, 60, 40, 30).unwrap();
    let expected = image::imageops::crop_imm(&source, 50, 60, 40, 30).to_image();
    assert_eq!(region, expected);

    // Bottom-right corner lies in a partial tile
    let corner = reader.read_region(0, 290, 190, 10, 10).unwrap();
    assert_eq!(corner.get_pixel(9, 9), source.get_pixel(299, 199));

    assert!(reader.read_region(0, 295, 0, 10, 10).is_err());
    assert!(reader.read_region(2, 0, 0, 1, 1).is_err());
}

#[tokio::test]
async fn test_abbreviated_jpeg_tiles() {
    let color = Rgb([200, 60, 90]);
    let source = RgbImage::from_pixel(128, 96, color);
    let data = tiled_pyramid(&source, 64, 2, TestTiles::jpeg);
    let (_dir, path) = write_temp("slide.svs", &data);

    let reader = TiffSlideReader::open(&path).await.unwrap().unwrap();
    assert_eq!(reader.level_count(), 2);

    let region = reader.read_region(0, 60, 60, 10, 10).unwrap();
    assert!(close(region.get_pixel(5, 5), &color, 8), "{:?}", region.get_pixel(5, 5));

    let coarse = reader.read_region(1, 0, 0, 64, 48).unwrap();
    assert!(close(coarse.get_pixel(32, 24), &color, 8));
}

#[tokio::test]
async fn test_unsupported_compression_is_declined() {
    let source = gradient(128, 128);
    let data = tiled_pyramid(&source, 64, 1, |image, tile| {
        TestTiles::raw_rgb(image, tile).with_compression(COMPRESSION_LZW)
    });
    let (_dir, path) = write_temp("slide.tif", &data);

    assert!(TiffSlideReader::open(&path).await.unwrap().is_none());
}

#[tokio::test]
async fn test_empty_tiles_read_as_background() {
    let source = gradient(128, 128);
    let mut tiles = TestTiles::raw_rgb(&source, 64);
    tiles.data[3].clear();
    let data = TiffBuilder::new(Endian::Little)
        .directory(TestDirectory::tiled(128, 128, 64).with_tiles(tiles))
        .build();
    let (_dir, path) = write_temp("sparse.tif", &data);

    let reader = TiffSlideReader::open(&path).await.unwrap().unwrap();
    let region = reader.read_region(0, 60, 60, 8, 8).unwrap();
    assert_eq!(region.get_pixel(0, 0), source.get_pixel(60, 60));
    assert_eq!(region.get_pixel(7, 7), &Rgb([255, 255, 255]));
}

// =============================================================================
// FileSourceOpener
// =============================================================================

#[tokio::test]
async fn test_opener_prefers_tiled_pyramid() {
    let source = gradient(300, 200);
    let (_dir, path) = write_temp("slide.tif", &tiled_pyramid(&source, 64, 3, TestTiles::raw_rgb));

    let reader = FileSourceOpener.open(&path).await.unwrap();
    // A mip chain of 300x200 would stop at 38x25, one level deeper
    assert_eq!(reader.level_count(), 3);
    assert_eq!(
        reader.read_region(0, 10, 10, 5, 5).unwrap(),
        image::imageops::crop_imm(&source, 10, 10, 5, 5).to_image()
    );
}

#[tokio::test]
async fn test_opener_falls_back_to_mip_chain() {
    let (_dir, path) = write_temp("strips.tif", &tiff_bytes(300, 200));

    let reader = FileSourceOpener.open(&path).await.unwrap();
    assert_eq!(reader.level_count(), 4);
    assert_eq!(reader.level_dimensions(3), Some((38, 25)));
}

// =============================================================================
// Over HTTP
// =============================================================================

#[tokio::test]
async fn test_convert_tiled_upload() {
    let app = TestApp::new().await;
    let source = gradient(300, 200);
    app.upload_ok("scan.tif", &tiled_pyramid(&source, 64, 3, TestTiles::raw_rgb))
        .await;

    app.post("/convert/scan").await;
    let seen = app.wait_for_job("scan").await;
    assert_eq!(seen.last().unwrap()["status"], "complete");

    // Finest tiles are a straight copy of level 0
    let max_level = PyramidLayout::new(300, 200, TILE_SIZE, 1).max_level();
    let response = app.get(&format!("/tiles/scan/{}/0_0.png", max_level)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tile = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .into_rgb8();
    assert_eq!(
        tile,
        image::imageops::crop_imm(&source, 0, 0, TILE_SIZE + 1, TILE_SIZE + 1).to_image()
    );
}

#[tokio::test]
async fn test_upload_oversize_stripped_tiff_rejected() {
    let app = TestApp::new().await;
    let data = TiffBuilder::new(Endian::Little)
        .directory(TestDirectory::stripped(20000, 15000))
        .build();

    let response = app.upload("huge.tif", &data).await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("20000x15000"), "{}", json);

    let listing = body_json(app.get("/slides").await).await;
    assert!(listing["slides"].as_array().unwrap().is_empty());
}
