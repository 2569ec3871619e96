//! Slide service: the operations behind the HTTP API and the CLI.
//!
//! The service wires the slide registry, the upload store, the tile store and
//! the converter together. Handlers call one method per endpoint and never
//! touch the stores directly.
//!
//! # Startup
//!
//! [`SlideService::scan`] rebuilds the registry from the upload directory.
//! Flags are recovered from each slide's persisted descriptor: a complete
//! descriptor means `converted`, any ready level means `viewable`. Job
//! progress is not persisted.
//!
//! # Delete ordering
//!
//! 1. Remove the record, so new requests see NotFound
//! 2. Close the slide's gate, waiting for at most one in-flight tile write
//! 3. Discard the tile directory and purge the tile cache
//! 4. Remove the upload and the progress entry

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::convert::{ConvertOptions, Converter, JobHandle, JobSnapshot, ProgressTracker, DEFAULT_WORKERS};
use crate::error::{IoError, ProgressError, SlideError, TileError};
use crate::format::{allowed_file, inspect, SlideMetadata};
use crate::io::{AtomicFile, FileRangeReader};
use crate::slide::{
    is_valid_slide_name, sanitize_filename, slide_name_of, FileSourceOpener, LocalUploadStore,
    SlideRecord, SlideRegistry, SourceOpener, UploadStore,
};
use crate::tile::{PyramidDescriptor, TileCache, TileFormat, TileStore, DEFAULT_TILE_CACHE_CAPACITY};
use crate::viewing::{next_after_failure, select_strategy, Strategy, ViewPlan};

// =============================================================================
// Options
// =============================================================================

/// Runtime parameters of a [`SlideService`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceOptions {
    /// Geometry and encoding of generated pyramids
    pub convert: ConvertOptions,

    /// Slides converted concurrently
    pub workers: usize,

    /// In-memory tile cache size in bytes
    pub tile_cache_bytes: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            convert: ConvertOptions::default(),
            workers: DEFAULT_WORKERS,
            tile_cache_bytes: DEFAULT_TILE_CACHE_CAPACITY,
        }
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// One entry of the slide listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideSummary {
    pub name: String,
    pub filename: String,
    pub size: u64,
    pub converted: bool,
    pub viewable: bool,
    #[serde(flatten)]
    pub plan: ViewPlan,
}

impl SlideSummary {
    fn from_record(record: &SlideRecord) -> Self {
        Self {
            name: record.name.clone(),
            filename: record.filename.clone(),
            size: record.size,
            converted: record.converted,
            viewable: record.viewable,
            plan: view_plan_of(record),
        }
    }
}

/// Full details of one slide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlideDetails {
    #[serde(flatten)]
    pub record: SlideRecord,
    #[serde(flatten)]
    pub plan: ViewPlan,
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub filename: String,
    pub name: String,
    pub info: SlideMetadata,
}

/// Where a viewer should read a slide from right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewResolution {
    pub slide_id: String,
    pub strategy: Strategy,
    pub fallback: Option<Strategy>,
    /// Tile source for `strategy`
    pub url: String,
}

/// An upload being received.
///
/// Created by [`SlideService::begin_upload`]; bytes are appended with
/// [`write`](Self::write) and the slide is registered by
/// [`SlideService::finish_upload`]. Dropping it without finishing leaves a
/// hidden temporary file, so error paths should call [`abort`](Self::abort).
pub struct PendingUpload {
    filename: String,
    name: String,
    file: AtomicFile,
}

impl PendingUpload {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn written(&self) -> u64 {
        self.file.written()
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), SlideError> {
        Ok(self.file.write_all(chunk).await?)
    }

    pub async fn abort(self) {
        debug!(filename = %self.filename, "Upload aborted");
        self.file.abort().await;
    }
}

// =============================================================================
// SlideService
// =============================================================================

/// Orchestrates uploads, conversion and tile serving.
pub struct SlideService {
    registry: Arc<SlideRegistry>,
    uploads: Arc<dyn UploadStore>,
    tiles: Arc<TileStore>,
    converter: Converter,
    options: ConvertOptions,
}

impl SlideService {
    /// Assemble a service from its parts.
    pub fn new(
        registry: Arc<SlideRegistry>,
        uploads: Arc<dyn UploadStore>,
        tiles: Arc<TileStore>,
        converter: Converter,
        options: ConvertOptions,
    ) -> Self {
        Self {
            registry,
            uploads,
            tiles,
            converter,
            options,
        }
    }

    /// Create a service over local directories, decoding sources with the
    /// `image` crate.
    ///
    /// The registry starts empty; call [`scan`](Self::scan) to load existing
    /// uploads.
    pub async fn open(
        upload_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        options: ServiceOptions,
    ) -> Result<Self, IoError> {
        Self::open_with_opener(upload_dir, cache_dir, options, Arc::new(FileSourceOpener)).await
    }

    /// Like [`open`](Self::open) with a custom source decoder.
    pub async fn open_with_opener(
        upload_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        options: ServiceOptions,
        opener: Arc<dyn SourceOpener>,
    ) -> Result<Self, IoError> {
        let uploads = Arc::new(LocalUploadStore::new(upload_dir).await?);
        let tiles = Arc::new(
            TileStore::open(
                cache_dir,
                TileCache::with_capacity(options.tile_cache_bytes),
            )
            .await?,
        );
        let registry = Arc::new(SlideRegistry::new());
        let converter = Converter::new(
            registry.clone(),
            tiles.clone(),
            Arc::new(ProgressTracker::new()),
            opener,
            options.workers,
        );

        Ok(Self::new(registry, uploads, tiles, converter, options.convert))
    }

    pub fn registry(&self) -> &Arc<SlideRegistry> {
        &self.registry
    }

    pub fn tiles(&self) -> &Arc<TileStore> {
        &self.tiles
    }

    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    pub fn convert_options(&self) -> ConvertOptions {
        self.options
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register every acceptable upload in the store. Returns how many slides
    /// were registered.
    ///
    /// Uploads whose stem collides with an earlier file are skipped.
    pub async fn scan(&self) -> Result<usize, IoError> {
        let mut count = 0;
        for entry in self.uploads.list().await? {
            if !allowed_file(&entry.filename) {
                debug!(filename = %entry.filename, "Skipping file with unsupported extension");
                continue;
            }
            let name = slide_name_of(&entry.filename);
            if self.registry.get(&name).await.is_some() {
                warn!(filename = %entry.filename, name = %name, "Skipping upload with duplicate slide name");
                continue;
            }
            match self.register(&entry.filename).await {
                Ok(_) => count += 1,
                Err(e) => warn!(filename = %entry.filename, error = %e, "Failed to register upload"),
            }
        }
        info!(slides = count, "Slide scan complete");
        Ok(count)
    }

    /// Register an upload that is already in the store.
    ///
    /// Inspection failures are logged and leave the metadata empty; flags
    /// are recovered from a persisted descriptor.
    pub async fn register(&self, filename: &str) -> Result<SlideRecord, SlideError> {
        let name = slide_name_of(filename);
        if !is_valid_slide_name(&name) {
            return Err(SlideError::InvalidName { name });
        }

        let path = self.uploads.path_of(filename);
        let size = tokio::fs::metadata(&path).await.map_err(IoError::from)?.len();

        let mut record = SlideRecord::new(name.clone(), filename, path.clone(), size);
        match inspect(&path).await {
            Ok(metadata) => record.metadata = Some(metadata),
            Err(e) => warn!(filename, error = %e, "Inspection failed"),
        }
        if let Ok(descriptor) = self.tiles.get_descriptor(&name).await {
            record.viewable = descriptor.levels_ready > 0;
            record.converted = descriptor.complete;
        }

        let (_, previous) = self.registry.insert(record.clone()).await;
        if let Some(previous) = previous {
            previous.close().await;
        }
        debug!(name = %name, filename, converted = record.converted, viewable = record.viewable, "Registered slide");
        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Upload
    // -------------------------------------------------------------------------

    /// Validate a client filename and open a pending upload for it.
    ///
    /// # Errors
    ///
    /// - [`SlideError::InvalidName`] if nothing usable remains after
    ///   sanitizing
    /// - [`SlideError::UnsupportedExtension`] if the extension is not accepted
    pub async fn begin_upload(&self, raw_filename: &str) -> Result<PendingUpload, SlideError> {
        let filename = sanitize_filename(raw_filename).ok_or_else(|| SlideError::InvalidName {
            name: raw_filename.to_string(),
        })?;
        if !allowed_file(&filename) {
            return Err(SlideError::UnsupportedExtension { filename });
        }
        let name = slide_name_of(&filename);
        if !is_valid_slide_name(&name) {
            return Err(SlideError::InvalidName { name });
        }

        let file = self.uploads.create(&filename).await?;
        Ok(PendingUpload {
            filename,
            name,
            file,
        })
    }

    /// Inspect, publish and register a received upload.
    ///
    /// An upload that cannot be inspected is discarded. A slide with the same
    /// name is deleted (tiles, progress and original) before the new file is
    /// published.
    pub async fn finish_upload(&self, mut pending: PendingUpload) -> Result<UploadResult, SlideError> {
        if let Err(e) = pending.file.flush().await {
            pending.abort().await;
            return Err(e.into());
        }

        let metadata = match inspect(pending.file.temp_path()).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(filename = %pending.filename, error = %e, "Rejected upload");
                pending.abort().await;
                return Err(e.into());
            }
        };

        if self.registry.get(&pending.name).await.is_some() {
            info!(name = %pending.name, "Replacing existing slide");
            self.delete(&pending.name).await?;
        }

        let PendingUpload {
            filename,
            name,
            file,
        } = pending;
        let size = file.commit().await?;

        let mut record = SlideRecord::new(name.clone(), filename.clone(), self.uploads.path_of(&filename), size);
        record.metadata = Some(metadata.clone());
        let (_, previous) = self.registry.insert(record).await;
        if let Some(previous) = previous {
            previous.close().await;
        }

        info!(
            name = %name,
            filename = %filename,
            size,
            format = %metadata.format,
            width = metadata.width,
            height = metadata.height,
            "Upload registered"
        );

        Ok(UploadResult {
            success: true,
            filename,
            name,
            info: metadata,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Every slide, sorted by name, with its viewing plan.
    pub async fn list(&self) -> Vec<SlideSummary> {
        self.registry
            .list()
            .await
            .iter()
            .map(SlideSummary::from_record)
            .collect()
    }

    /// Details of one slide, inspecting it now if the cached metadata is
    /// missing.
    pub async fn info(&self, name: &str) -> Result<SlideDetails, SlideError> {
        let mut record = self.require(name).await?;

        if record.metadata.is_none() {
            let metadata = inspect(&record.path).await?;
            self.registry.set_metadata(name, metadata.clone()).await;
            record.metadata = Some(metadata);
        }

        let plan = view_plan_of(&record);
        Ok(SlideDetails { record, plan })
    }

    /// Resolve where a viewer should read the slide from.
    ///
    /// With `failed`, the viewer reports that strategy did not work; the
    /// fallback is returned if one applies.
    ///
    /// # Errors
    ///
    /// [`SlideError::ViewUnavailable`] when no strategy is left.
    pub async fn view(&self, name: &str, failed: Option<Strategy>) -> Result<ViewResolution, SlideError> {
        let record = self.require(name).await?;
        let plan = view_plan_of(&record);

        let (strategy, fallback) = match failed {
            None => (plan.strategy, plan.fallback),
            Some(failed) => {
                let descriptor_available = self.tiles.get_descriptor(name).await.is_ok();
                match next_after_failure(&plan, failed, descriptor_available) {
                    Some(next) => (next, None),
                    None => {
                        return Err(SlideError::ViewUnavailable {
                            slide_id: name.to_string(),
                            failed: failed.as_str().to_string(),
                        })
                    }
                }
            }
        };

        let url = match strategy {
            Strategy::Direct => raw_url(&record.filename),
            Strategy::Pyramid => dzi_url(name),
        };
        Ok(ViewResolution {
            slide_id: name.to_string(),
            strategy,
            fallback,
            url,
        })
    }

    // -------------------------------------------------------------------------
    // Conversion
    // -------------------------------------------------------------------------

    /// Start (or join) the slide's conversion.
    pub async fn convert(&self, name: &str) -> Result<JobHandle, SlideError> {
        self.converter.start(name, self.options).await
    }

    pub async fn progress(&self, name: &str) -> Result<JobSnapshot, ProgressError> {
        self.converter.snapshot(name).await
    }

    /// Poll until the slide's job reaches a terminal state.
    pub async fn wait_for(&self, name: &str, interval: Duration) -> Result<JobSnapshot, ProgressError> {
        loop {
            let snapshot = self.converter.snapshot(name).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(interval).await;
        }
    }

    // -------------------------------------------------------------------------
    // Tiles
    // -------------------------------------------------------------------------

    pub async fn descriptor(&self, name: &str) -> Result<PyramidDescriptor, TileError> {
        self.require_tiles(name).await?;
        self.tiles.get_descriptor(name).await
    }

    pub async fn tile(
        &self,
        name: &str,
        level: u32,
        col: u32,
        row: u32,
        format: TileFormat,
    ) -> Result<Bytes, TileError> {
        self.require_tiles(name).await?;
        self.tiles.get_tile(name, level, col, row, format).await
    }

    /// Open a registered upload for ranged streaming.
    pub async fn open_raw(&self, filename: &str) -> Result<FileRangeReader, SlideError> {
        let known = self
            .registry
            .list()
            .await
            .into_iter()
            .any(|r| r.filename == filename);
        if !known {
            return Err(SlideError::NotFound {
                slide_id: filename.to_string(),
            });
        }
        Ok(self.uploads.open(filename).await?)
    }

    // -------------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------------

    /// Remove a slide's record, tiles, progress and original upload.
    pub async fn delete(&self, name: &str) -> Result<SlideRecord, SlideError> {
        let (record, gate) = self
            .registry
            .remove(name)
            .await
            .ok_or_else(|| SlideError::NotFound {
                slide_id: name.to_string(),
            })?;

        gate.close().await;
        self.tiles.delete_slide(name).await?;
        self.uploads.remove(&record.filename).await?;
        self.converter.progress().remove(name).await;

        info!(name, filename = %record.filename, "Slide deleted");
        Ok(record)
    }

    async fn require(&self, name: &str) -> Result<SlideRecord, SlideError> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| SlideError::NotFound {
                slide_id: name.to_string(),
            })
    }

    async fn require_tiles(&self, name: &str) -> Result<(), TileError> {
        match self.registry.get(name).await {
            Some(_) => Ok(()),
            None => Err(TileError::SlideNotFound {
                slide_id: name.to_string(),
            }),
        }
    }
}

fn view_plan_of(record: &SlideRecord) -> ViewPlan {
    select_strategy(&record.extension(), record.converted, record.viewable)
}

/// URL of a slide's DZI descriptor.
pub fn dzi_url(name: &str) -> String {
    format!("/dzi/{}.dzi", urlencoding::encode(name))
}

/// URL of an original upload.
pub fn raw_url(filename: &str) -> String {
    format!("/raw/{}", urlencoding::encode(filename))
}

// =============================================================================
// Tests
// =============================================================================
