//! I/O layer for uploads and the tile cache.
//!
//! - [`RangeReader`]: positioned reads over an upload, used by format
//!   inspection and raw streaming
//! - [`AtomicFile`] / [`write_atomic`]: publish-by-rename writes so concurrent
//!   readers never observe partial files

mod atomic;
mod range_reader;

pub use atomic::{is_temp_name, temp_path_for, write_atomic, AtomicFile, TEMP_SUFFIX};
pub use range_reader::{FileRangeReader, RangeReader};
