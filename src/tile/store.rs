//! On-disk tile store.
//!
//! # Layout
//!
//! ```text
//! {root}/
//!   {slide}_files/
//!     pyramid.json          persisted PyramidDescriptor
//!     {level}/
//!       {col}_{row}.{format}
//! ```
//!
//! Everything belonging to a slide lives under one directory so that
//! clearing or deleting it is a single rename followed by a background-safe
//! recursive removal. Readers racing a delete see either complete bytes or
//! NotFound, never a partial tree.
//!
//! # Writes
//!
//! All writes take a shared permit from the slide's [`SlideGate`] and are
//! published by rename. Once the gate is closed, writes are skipped and
//! reported as [`WriteOutcome::Cancelled`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::error::{IoError, TileError};
use crate::io::{is_temp_name, write_atomic};
use crate::slide::SlideGate;

use super::cache::{TileCache, TileCacheKey};
use super::descriptor::PyramidDescriptor;
use super::encoder::TileFormat;

/// File name of the persisted descriptor inside a slide's tile directory.
pub const DESCRIPTOR_FILE: &str = "pyramid.json";

const TRASH_PREFIX: &str = ".trash-";

static TRASH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Result of a gated write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The data is published.
    Written,

    /// The slide was deleted; nothing was written.
    Cancelled,
}

/// Persistent tile and descriptor storage with an in-memory hot set.
pub struct TileStore {
    root: PathBuf,
    cache: TileCache,
}

impl TileStore {
    /// Open a store rooted at `root`.
    ///
    /// Creates the directory if needed and removes trash left behind by an
    /// interrupted delete.
    pub async fn open(root: impl Into<PathBuf>, cache: TileCache) -> Result<Self, IoError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TRASH_PREFIX) || is_temp_name(&name) {
                remove_path(&entry.path()).await;
            }
        }

        Ok(Self { root, cache })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Directory holding everything generated for a slide.
    pub fn slide_dir(&self, slide_id: &str) -> PathBuf {
        self.root.join(format!("{}_files", slide_id))
    }

    fn descriptor_path(&self, slide_id: &str) -> PathBuf {
        self.slide_dir(slide_id).join(DESCRIPTOR_FILE)
    }

    fn tile_path(&self, slide_id: &str, level: u32, col: u32, row: u32, format: TileFormat) -> PathBuf {
        self.slide_dir(slide_id)
            .join(level.to_string())
            .join(format!("{}_{}.{}", col, row, format.extension()))
    }

    // -------------------------------------------------------------------------
    // Writes (gated)
    // -------------------------------------------------------------------------

    /// Remove any previous pyramid before a fresh conversion run.
    pub async fn clear_pyramid(&self, gate: &SlideGate, slide_id: &str) -> Result<WriteOutcome, TileError> {
        let Some(_permit) = gate.enter().await else {
            return Ok(WriteOutcome::Cancelled);
        };
        self.discard_slide_dir(slide_id).await?;
        Ok(WriteOutcome::Written)
    }

    /// Publish one encoded tile.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_tile(
        &self,
        gate: &SlideGate,
        slide_id: &str,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
        data: &[u8],
    ) -> Result<WriteOutcome, TileError> {
        let Some(_permit) = gate.enter().await else {
            return Ok(WriteOutcome::Cancelled);
        };
        write_atomic(self.tile_path(slide_id, level, col, row, format), data).await?;
        Ok(WriteOutcome::Written)
    }

    /// Publish (or replace) the slide's descriptor.
    pub async fn publish_descriptor(
        &self,
        gate: &SlideGate,
        slide_id: &str,
        descriptor: &PyramidDescriptor,
    ) -> Result<WriteOutcome, TileError> {
        let json = serde_json::to_vec_pretty(descriptor).map_err(|e| TileError::EncodeError {
            message: e.to_string(),
        })?;

        let Some(_permit) = gate.enter().await else {
            return Ok(WriteOutcome::Cancelled);
        };
        write_atomic(self.descriptor_path(slide_id), &json).await?;

        debug!(
            slide_id,
            levels_ready = descriptor.levels_ready,
            complete = descriptor.complete,
            "Published descriptor"
        );
        Ok(WriteOutcome::Written)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Load the slide's descriptor.
    ///
    /// # Errors
    ///
    /// [`TileError::DescriptorNotFound`] until the first level is cached.
    pub async fn get_descriptor(&self, slide_id: &str) -> Result<PyramidDescriptor, TileError> {
        let path = self.descriptor_path(slide_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TileError::DescriptorNotFound {
                    slide_id: slide_id.to_string(),
                })
            }
            Err(e) => return Err(IoError::from(e).into()),
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            IoError::Storage(format!("{}: invalid descriptor: {}", path.display(), e)).into()
        })
    }

    /// Read one tile.
    ///
    /// # Errors
    ///
    /// - [`TileError::NotFound`] if the tile's level has not been generated
    /// - [`TileError::CorruptCache`] if the descriptor marks the level ready
    ///   but the file is missing
    /// - [`TileError::InvalidLevel`], [`TileError::TileOutOfBounds`] or
    ///   [`TileError::InvalidFormat`] for addresses outside the pyramid
    pub async fn get_tile(
        &self,
        slide_id: &str,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<Bytes, TileError> {
        let key = TileCacheKey::new(slide_id, level, col, row, format);
        if let Some(hit) = self.cache.get(&key).await {
            return Ok(hit);
        }
        let generation = self.cache.generation().await;

        let not_found = || TileError::NotFound {
            slide_id: slide_id.to_string(),
            level,
            col,
            row,
        };

        let descriptor = match self.get_descriptor(slide_id).await {
            Ok(d) => d,
            Err(TileError::DescriptorNotFound { .. }) => return Err(not_found()),
            Err(e) => return Err(e),
        };
        Self::check_address(&descriptor, level, col, row, format)?;

        let path = self.tile_path(slide_id, level, col, row, format);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let bytes = Bytes::from(bytes);
                self.cache.put_if_current(key, bytes.clone(), generation).await;
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Re-read: a concurrent clear or delete also makes the file vanish
                match self.get_descriptor(slide_id).await {
                    Ok(current) if current.is_level_ready(level) => {
                        error!(
                            slide_id,
                            level,
                            col,
                            row,
                            "Tile missing from a level marked ready"
                        );
                        Err(TileError::CorruptCache {
                            slide_id: slide_id.to_string(),
                            level,
                            col,
                            row,
                        })
                    }
                    _ => {
                        debug!(slide_id, level, col, row, "Tile not generated yet");
                        Err(not_found())
                    }
                }
            }
            Err(e) => Err(IoError::from(e).into()),
        }
    }

    fn check_address(
        descriptor: &PyramidDescriptor,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<(), TileError> {
        if format != descriptor.format {
            return Err(TileError::InvalidFormat {
                format: format.extension().to_string(),
            });
        }

        let layout = descriptor.layout();
        let lvl = layout.level(level).ok_or(TileError::InvalidLevel {
            level,
            level_count: descriptor.level_count,
        })?;
        if !lvl.contains_tile(col, row) {
            return Err(TileError::TileOutOfBounds {
                level,
                col,
                row,
                cols: lvl.cols,
                rows: lvl.rows,
            });
        }
        Ok(())
    }

    /// Number of committed tile files for a slide.
    pub async fn count_tiles(&self, slide_id: &str) -> Result<usize, IoError> {
        let dir = self.slide_dir(slide_id);
        let mut levels = match tokio::fs::read_dir(&dir).await {
            Ok(levels) => levels,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(level) = levels.next_entry().await? {
            if !level.file_type().await?.is_dir() {
                continue;
            }
            let mut tiles = tokio::fs::read_dir(level.path()).await?;
            while let Some(tile) = tiles.next_entry().await? {
                if !is_temp_name(&tile.file_name().to_string_lossy()) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    // -------------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------------

    /// Remove every tile and the descriptor of a slide.
    ///
    /// The caller must have closed the slide's gate first, so no writer can
    /// recreate the directory.
    pub async fn delete_slide(&self, slide_id: &str) -> Result<(), TileError> {
        self.discard_slide_dir(slide_id).await?;
        info!(slide_id, "Deleted tile cache");
        Ok(())
    }

    async fn discard_slide_dir(&self, slide_id: &str) -> Result<(), IoError> {
        let dir = self.slide_dir(slide_id);
        let trash = self.root.join(format!(
            "{}{}.{}.{}",
            TRASH_PREFIX,
            slide_id,
            std::process::id(),
            TRASH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        match tokio::fs::rename(&dir, &trash).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cache.remove_slide(slide_id).await;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let purged = self.cache.remove_slide(slide_id).await;
        tokio::fs::remove_dir_all(&trash).await?;
        debug!(slide_id, purged, "Discarded tile directory");
        Ok(())
    }
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to remove leftover cache entry");
    }
}

// =============================================================================
// Tests
// =============================================================================
