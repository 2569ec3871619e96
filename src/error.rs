use thiserror::Error;

/// I/O errors that can occur when reading uploads or the tile cache
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Filesystem or storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Storage(err.to_string()),
        }
    }
}

/// Errors that can occur when parsing TIFF headers and directories
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Value array is implausibly long
    #[error("Value array too long: {0} entries")]
    ArrayTooLong(u64),
}

/// Errors raised while inspecting or decoding a source image
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// TIFF parsing error
    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// File format is not supported (maps to HTTP 415)
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Pixel data could not be decoded
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Requested region lies outside the image
    #[error("Region ({x}, {y}, {width}x{height}) is outside level {level}")]
    RegionOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}

/// Errors that can occur when serving or storing tiles
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Slide is not registered
    #[error("Slide not found: {slide_id}")]
    SlideNotFound { slide_id: String },

    /// Tile has not been generated (yet)
    #[error("Tile not found: {slide_id} level {level} ({col}, {row})")]
    NotFound {
        slide_id: String,
        level: u32,
        col: u32,
        row: u32,
    },

    /// Descriptor is not available until the first level is cached
    #[error("Descriptor not available for slide: {slide_id}")]
    DescriptorNotFound { slide_id: String },

    /// Tile missing from a level the descriptor marks as ready
    #[error("Corrupt cache: {slide_id} level {level} ({col}, {row}) is missing from a ready level")]
    CorruptCache {
        slide_id: String,
        level: u32,
        col: u32,
        row: u32,
    },

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: pyramid has {level_count} levels")]
    InvalidLevel { level: u32, level_count: u32 },

    /// Tile coordinates are outside the level's grid
    #[error("Tile ({col}, {row}) out of bounds for level {level} (grid {cols}x{rows})")]
    TileOutOfBounds {
        level: u32,
        col: u32,
        row: u32,
        cols: u32,
        rows: u32,
    },

    /// Requested tile format differs from the pyramid's format
    #[error("Invalid tile format: {format}")]
    InvalidFormat { format: String },

    /// I/O error reading or writing the cache
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Tile encoding failed
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },
}

/// Errors from the progress tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// No job has been started for this slide
    #[error("No conversion job for slide: {slide_id}")]
    NotFound { slide_id: String },

    /// The update belongs to a run that has been replaced
    #[error("Run {run} for slide {slide_id} has been superseded")]
    Superseded { slide_id: String, run: u64 },
}

/// Errors from slide registry and upload operations
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// Slide is not registered
    #[error("Slide not found: {slide_id}")]
    NotFound { slide_id: String },

    /// Slide identifier or filename is not acceptable
    #[error("Invalid slide name: {name}")]
    InvalidName { name: String },

    /// Upload rejected because of its extension
    #[error("File type not supported: {filename}")]
    UnsupportedExtension { filename: String },

    /// Upload exceeds the configured body limit
    #[error("Upload too large")]
    UploadTooLarge,

    /// Multipart request without a usable file part
    #[error("Invalid upload: {message}")]
    InvalidUpload { message: String },

    /// Every viewing strategy for the slide has failed
    #[error("No viewing strategy left for slide {slide_id} after {failed} failed")]
    ViewUnavailable { slide_id: String, failed: String },

    /// Tile cache error during delete or lookup
    #[error("{0}")]
    Tile(#[from] TileError),

    /// Inspection failed
    #[error("{0}")]
    Format(#[from] FormatError),

    /// Storage error
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors that abort a conversion run
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    /// Source image could not be opened or decoded
    #[error("Conversion failed: {0}")]
    Format(#[from] FormatError),

    /// Tile could not be encoded or written
    #[error("Conversion failed: {0}")]
    Tile(#[from] TileError),

    /// Slide was deleted while the job was running
    #[error("Conversion cancelled")]
    Cancelled,

    /// Worker task ended abnormally
    #[error("Conversion worker failed: {0}")]
    Worker(String),
}
