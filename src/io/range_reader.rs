use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::error::IoError;

/// Trait for reading byte ranges from an upload.
///
/// The TIFF directory walker only ever needs a handful of small reads, so
/// readers must not require the whole file to be loaded. Implementations must
/// be thread-safe.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Get the total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this resource (for logging).
    fn identifier(&self) -> &str;
}

// =============================================================================
// FileRangeReader
// =============================================================================

/// Range reader backed by a local file.
pub struct FileRangeReader {
    path: PathBuf,
    identifier: String,
    size: u64,
    file: Mutex<File>,
}

impl FileRangeReader {
    /// Open a file for ranged reads.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(path.display().to_string()),
            _ => IoError::Storage(format!("{}: {}", path.display(), e)),
        })?;
        let size = file.metadata().await?.len();

        Ok(Self {
            identifier: path.display().to_string(),
            path,
            size,
            file: Mutex::new(file),
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open an independent stream over `len` bytes starting at `offset`.
    ///
    /// Each stream owns its own file handle, so concurrent HTTP responses do
    /// not contend on the reader's seek position.
    pub async fn stream_range(
        &self,
        offset: u64,
        len: u64,
    ) -> Result<ReaderStream<tokio::io::Take<File>>, IoError> {
        self.check_range(offset, len)?;

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(ReaderStream::new(file.take(len)))
    }

    fn check_range(&self, offset: u64, len: u64) -> Result<(), IoError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(IoError::RangeOutOfBounds {
                offset,
                requested: len,
                size: self.size,
            }),
        }
    }
}

#[async_trait]
impl RangeReader for FileRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.check_range(offset, len as u64)?;

        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;

        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
