//! Storage for original uploads.
//!
//! [`UploadStore`] is the seam between the slide service and wherever the
//! original files live. [`LocalUploadStore`] keeps them in one flat
//! directory, named by their sanitized upload filename.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::IoError;
use crate::io::{is_temp_name, AtomicFile, FileRangeReader};

/// An upload found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub filename: String,
    pub size: u64,
}

/// Storage backend for original uploads.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// List every committed upload, sorted by filename.
    async fn list(&self) -> Result<Vec<UploadEntry>, IoError>;

    /// Begin writing an upload. It becomes visible on commit.
    async fn create(&self, filename: &str) -> Result<AtomicFile, IoError>;

    /// Open an upload for ranged reads.
    async fn open(&self, filename: &str) -> Result<FileRangeReader, IoError>;

    /// Local path of an upload (which may not exist).
    fn path_of(&self, filename: &str) -> PathBuf;

    /// Remove an upload. Removing a missing upload succeeds.
    async fn remove(&self, filename: &str) -> Result<(), IoError>;
}

// =============================================================================
// LocalUploadStore
// =============================================================================

/// Uploads stored as files in a single directory.
#[derive(Debug, Clone)]
pub struct LocalUploadStore {
    root: PathBuf,
}

impl LocalUploadStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, IoError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl UploadStore for LocalUploadStore {
    async fn list(&self) -> Result<Vec<UploadEntry>, IoError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut uploads = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_temp_name(&filename) {
                continue;
            }
            uploads.push(UploadEntry {
                filename,
                size: metadata.len(),
            });
        }

        uploads.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!(root = %self.root.display(), count = uploads.len(), "Listed uploads");
        Ok(uploads)
    }

    async fn create(&self, filename: &str) -> Result<AtomicFile, IoError> {
        AtomicFile::create(self.path_of(filename)).await
    }

    async fn open(&self, filename: &str) -> Result<FileRangeReader, IoError> {
        FileRangeReader::open(self.path_of(filename)).await
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    async fn remove(&self, filename: &str) -> Result<(), IoError> {
        match tokio::fs::remove_file(self.path_of(filename)).await {
            Ok(()) => {
                info!(filename, "Removed upload");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Filename handling
// =============================================================================

/// Reduce a client-supplied filename to a safe flat name.
///
/// Directory components are discarded, whitespace becomes `_`, and anything
/// outside `[A-Za-z0-9._-]` is dropped. Leading dots are stripped so the
/// result can never be hidden or a temporary name. Returns `None` if
/// nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Slide identifier for an upload filename: its stem.
pub fn slide_name_of(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// Whether a slide identifier is safe to use as a path component.
pub fn is_valid_slide_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
