//! Slide lifecycle: uploads, records and pixel access.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             SlideService                │
//! └──────────┬─────────────────┬────────────┘
//!            │                 │
//!            ▼                 ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │   SlideRegistry    │ │   UploadStore    │
//! │ (records + gates)  │ │ (original files) │
//! └────────────────────┘ └──────────────────┘
//!
//! ┌─────────────────────────────────────────┐
//! │    SourceOpener → SlideReader trait     │
//! │   (region reads used by the converter)  │
//! └──────────┬─────────────────┬────────────┘
//!            ▼                 ▼
//! ┌────────────────────┐ ┌──────────────────┐
//! │  TiffSlideReader   │ │DecodedImageReader│
//! │ (tiled pyramids)   │ │ (mip chain)      │
//! └────────────────────┘ └──────────────────┘
//! ```

mod reader;
mod record;
mod registry;
mod tiff_reader;
mod upload;

pub use reader::{
    decode_limits, DecodedImageReader, FileSourceOpener, SlideReader, SourceOpener, MIP_MIN_EDGE,
};
pub use tiff_reader::TiffSlideReader;
pub use record::{SlideGate, SlideRecord};
pub use registry::SlideRegistry;
pub use upload::{
    is_valid_slide_name, sanitize_filename, slide_name_of, LocalUploadStore, UploadEntry,
    UploadStore,
};
