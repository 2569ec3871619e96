//! Extension classification and magic-byte format detection.
//!
//! Two independent questions are answered here:
//!
//! - Is an upload acceptable at all? (extension allow-list)
//! - Can a viewer read the original file's own pyramid without conversion?
//!   (directly streamable set)
//!
//! Neither question opens the file. Content-based detection of what was
//! actually uploaded lives in [`SlideFormat::sniff`].

use std::path::Path;

use super::tiff::is_tiff_header;

/// Extensions accepted on upload.
///
/// Vendor WSI containers first, then plain rasters which convert fine but
/// carry no native pyramid.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "svs", "tif", "tiff", "vms", "vmu", "ndpi", "scn", "mrxs", "svslide", "bif", "png", "jpg",
    "jpeg",
];

/// Containers whose internal multi-resolution layout a browser-side TIFF
/// reader can stream in place.
pub const DIRECTLY_STREAMABLE_EXTENSIONS: &[&str] = &["svs", "tif", "tiff"];

/// Lower-cased extension of a filename, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a file with this extension may be uploaded.
pub fn is_allowed_extension(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Whether the original file can be viewed without building a pyramid.
pub fn is_directly_streamable(extension: &str) -> bool {
    let ext = extension.trim_start_matches('.').to_ascii_lowercase();
    DIRECTLY_STREAMABLE_EXTENSIONS.contains(&ext.as_str())
}

/// Whether `filename` has an allowed extension.
pub fn allowed_file(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| is_allowed_extension(&ext))
}

// =============================================================================
// SlideFormat
// =============================================================================

/// Container format detected from file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideFormat {
    /// Aperio SVS (TIFF with an "Aperio" ImageDescription)
    AperioSvs,

    /// Any other TIFF or BigTIFF
    GenericTiff,

    /// PNG, JPEG and other single-resolution rasters
    Raster,
}

impl SlideFormat {
    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            SlideFormat::AperioSvs => "Aperio SVS",
            SlideFormat::GenericTiff => "Generic TIFF",
            SlideFormat::Raster => "Raster image",
        }
    }

    /// Classify leading file bytes.
    ///
    /// Returns `GenericTiff` for any TIFF; the Aperio refinement needs the
    /// first directory's description and is done by the inspector.
    pub fn sniff(header: &[u8]) -> Option<SlideFormat> {
        if is_tiff_header(header) {
            return Some(SlideFormat::GenericTiff);
        }
        image::guess_format(header)
            .ok()
            .map(|_| SlideFormat::Raster)
    }
}
