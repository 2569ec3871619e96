//! Format inspection for uploaded slide files.
//!
//! This module answers everything that can be learned about an upload
//! without decoding pixels:
//!
//! - [`detect`]: extension allow-list, the directly streamable set and
//!   magic-byte sniffing
//! - [`tiff`]: a minimal TIFF/BigTIFF directory walker over ranged reads
//! - [`jpeg`]: merging abbreviated JPEG tiles with their shared tables
//! - [`inspect`](mod@inspect): metadata extraction (dimensions, vendor,
//!   objective power, microns per pixel)
//!
//! # Supported Containers
//!
//! - **Aperio SVS**: identified by "Aperio" in the first ImageDescription
//! - **Generic TIFF**: any classic or BigTIFF file
//! - **Raster**: PNG and JPEG, single resolution, decoded whole up to
//!   [`MAX_DECODED_PIXELS`]

pub mod detect;
pub mod inspect;
pub mod jpeg;
pub mod tiff;

pub use detect::{
    allowed_file, extension_of, is_allowed_extension, is_directly_streamable, SlideFormat,
    ALLOWED_EXTENSIONS, DIRECTLY_STREAMABLE_EXTENSIONS,
};
pub use inspect::{
    check_decode_budget, inspect, DescriptionMetadata, SlideMetadata, MAX_DECODED_PIXELS,
};
pub use tiff::{is_tiff_header, TileCodec, TiffDirectory, TiffSummary, TileIndex};
