//! Publish-by-rename file writes.
//!
//! Every file this crate exposes to concurrent readers (tiles, descriptors,
//! uploads) is written to a uniquely named temporary file in the destination
//! directory and then renamed over the final path. A rename within one
//! directory is atomic, so readers observe either the complete file or no
//! file at all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::IoError;

/// Suffix shared by all in-progress files, so directory scans can skip them.
pub const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique sibling path for a pending write to `dest`.
///
/// The name is hidden and carries the process id plus a process-wide
/// counter, so concurrent writers never share a temporary file.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = format!(".{}.{}.{}{}", name, std::process::id(), n, TEMP_SUFFIX);
    match dest.parent() {
        Some(parent) => parent.join(file),
        None => PathBuf::from(file),
    }
}

/// Whether a directory entry is an in-progress temporary file.
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

// =============================================================================
// AtomicFile
// =============================================================================

/// A file being written that becomes visible only on [`commit`](Self::commit).
///
/// Dropping an uncommitted `AtomicFile` leaves the temporary file behind;
/// callers on an error path should use [`abort`](Self::abort).
pub struct AtomicFile {
    dest: PathBuf,
    temp: PathBuf,
    file: File,
    written: u64,
}

impl AtomicFile {
    /// Start a write to `dest`, creating parent directories as needed.
    pub async fn create(dest: impl AsRef<Path>) -> Result<Self, IoError> {
        let dest = dest.as_ref().to_path_buf();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = temp_path_for(&dest);
        let file = File::create(&temp).await?;

        Ok(Self {
            dest,
            temp,
            file,
            written: 0,
        })
    }

    /// Append bytes to the pending file.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), IoError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Where the pending bytes live until commit.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Push buffered bytes to the temporary file so it can be read back.
    pub async fn flush(&mut self) -> Result<(), IoError> {
        self.file.flush().await?;
        Ok(())
    }

    /// Flush and rename over the destination.
    pub async fn commit(mut self) -> Result<u64, IoError> {
        let result = async {
            self.file.flush().await?;
            self.file.sync_data().await?;
            tokio::fs::rename(&self.temp, &self.dest).await
        }
        .await;

        match result {
            Ok(()) => Ok(self.written),
            Err(e) => {
                discard(&self.temp).await;
                Err(e.into())
            }
        }
    }

    /// Discard the pending file.
    pub async fn abort(self) {
        drop(self.file);
        discard(&self.temp).await;
    }
}

/// Write `data` to `dest` atomically.
pub async fn write_atomic(dest: impl AsRef<Path>, data: &[u8]) -> Result<(), IoError> {
    let mut file = AtomicFile::create(dest).await?;
    if let Err(e) = file.write_all(data).await {
        file.abort().await;
        return Err(e);
    }
    file.commit().await.map(|_| ())
}

async fn discard(temp: &Path) {
    if let Err(e) = tokio::fs::remove_file(temp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
        }
    }
}
