use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;

use crate::format::{extension_of, SlideMetadata};

/// A registered slide.
///
/// The record is the single source of truth for the `converted` and
/// `viewable` flags. Only the converter flips them; only delete removes the
/// record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideRecord {
    /// Slide identifier (upload file stem)
    pub name: String,

    /// Original upload filename, including extension
    pub filename: String,

    /// Location of the upload on disk
    #[serde(skip)]
    pub path: PathBuf,

    /// Upload size in bytes
    pub size: u64,

    /// Every pyramid level has been generated
    pub converted: bool,

    /// At least the coarsest pyramid level is servable
    pub viewable: bool,

    /// Cached inspection result, absent until the first successful inspect
    pub metadata: Option<SlideMetadata>,
}

impl SlideRecord {
    pub fn new(name: impl Into<String>, filename: impl Into<String>, path: PathBuf, size: u64) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            path,
            size,
            converted: false,
            viewable: false,
            metadata: None,
        }
    }

    /// Lower-cased upload extension, or an empty string.
    pub fn extension(&self) -> String {
        extension_of(&self.filename).unwrap_or_default()
    }
}

// =============================================================================
// SlideGate
// =============================================================================

/// Liveness token and write gate for one slide.
///
/// Background writers hold a shared guard from [`enter`](Self::enter) for the
/// duration of each write. Deletion calls [`close`](Self::close), which
/// cancels the token and then waits for the exclusive side of the lock, so no
/// write can start after `close` returns and at most one in-flight write per
/// writer is waited for.
#[derive(Debug, Default)]
pub struct SlideGate {
    token: CancellationToken,
    lock: RwLock<()>,
}

impl SlideGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the slide still exists.
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Token cancelled when the slide is deleted.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Acquire a write permit, or `None` once the slide has been closed.
    pub async fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let guard = self.lock.read().await;
        if self.token.is_cancelled() {
            return None;
        }
        Some(guard)
    }

    /// Revoke liveness and wait for in-flight writes to finish.
    pub async fn close(&self) {
        self.token.cancel();
        let _exclusive = self.lock.write().await;
    }
}
