//! Background pyramid conversion.
//!
//! [`Converter::start`] registers a job with the [`ProgressTracker`] and
//! returns immediately. The job itself runs as a tokio task that waits for a
//! worker permit, then walks the Deep Zoom levels from the coarsest (level 0,
//! a single 1x1 tile) to full resolution:
//!
//! 1. Clear any previous pyramid and reset the slide's flags
//! 2. Open the source: tiled TIFF pyramids are read tile by tile, anything
//!    else is decoded whole into a mip chain
//! 3. For every tile: read the covering region from the best native level,
//!    resize, encode and publish atomically
//! 4. After each level: publish the descriptor with the new ready count
//! 5. After level 0: mark the slide `viewable`
//! 6. After the last level: mark the slide `converted`
//!
//! Decoding, resizing and encoding run in `spawn_blocking`. The slide's gate
//! is checked before every tile; once the slide is deleted the job stops
//! without error and without writing anything further.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{ConvertError, FormatError, ProgressError, SlideError};
use crate::slide::{SlideGate, SlideReader, SlideRegistry, SourceOpener};
use crate::tile::{
    PyramidDescriptor, PyramidLayout, TileBounds, TileEncoder, TileFormat, TileStore,
    WriteOutcome, DEFAULT_JPEG_QUALITY,
};

use super::job::{JobHandle, JobSnapshot, JobStatus};
use super::progress::{BeginOutcome, ProgressTracker};

/// Default tile edge length. With a 1px overlap, interior tiles are 256px.
pub const DEFAULT_TILE_SIZE: u32 = 254;

/// Default overlap between adjacent tiles.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Default number of slides converted concurrently.
pub const DEFAULT_WORKERS: usize = 2;

/// Parameters of one conversion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub tile_size: u32,
    pub overlap: u32,
    pub format: TileFormat,
    pub quality: u8,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_OVERLAP,
            format: TileFormat::Jpeg,
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Starts and tracks pyramid conversions.
///
/// Cheap to clone; clones share the worker pool and all state.
#[derive(Clone)]
pub struct Converter {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<SlideRegistry>,
    tiles: Arc<TileStore>,
    progress: Arc<ProgressTracker>,
    opener: Arc<dyn SourceOpener>,
    workers: Arc<Semaphore>,
}

/// Everything a running job needs.
struct Job {
    slide_id: String,
    run: u64,
    path: PathBuf,
    gate: Arc<SlideGate>,
    options: ConvertOptions,
}

impl Converter {
    /// Create a converter running at most `workers` jobs at once.
    pub fn new(
        registry: Arc<SlideRegistry>,
        tiles: Arc<TileStore>,
        progress: Arc<ProgressTracker>,
        opener: Arc<dyn SourceOpener>,
        workers: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                tiles,
                progress,
                opener,
                workers: Arc::new(Semaphore::new(workers.max(1))),
            }),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.inner.progress
    }

    /// Start converting a slide, or join the job already converting it.
    ///
    /// Returns without waiting for any conversion work. If a job for this
    /// slide is Queued or Running its current snapshot is returned with
    /// `started: false`; otherwise a fresh run (progress 0) replaces the
    /// previous entry.
    pub async fn start(&self, slide_id: &str, options: ConvertOptions) -> Result<JobHandle, SlideError> {
        let (record, gate) = self
            .inner
            .registry
            .get_with_gate(slide_id)
            .await
            .ok_or_else(|| SlideError::NotFound {
                slide_id: slide_id.to_string(),
            })?;

        let snapshot = match self.inner.progress.begin(slide_id).await {
            BeginOutcome::Active(snapshot) => {
                debug!(slide_id, run = snapshot.run, "Conversion already active");
                return Ok(JobHandle {
                    snapshot,
                    started: false,
                });
            }
            BeginOutcome::Started(snapshot) => snapshot,
        };

        info!(
            slide_id,
            run = snapshot.run,
            tile_size = options.tile_size,
            overlap = options.overlap,
            format = %options.format,
            "Conversion queued"
        );

        let job = Job {
            slide_id: slide_id.to_string(),
            run: snapshot.run,
            path: record.path,
            gate,
            options,
        };
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.run(job).await });

        Ok(JobHandle {
            snapshot,
            started: true,
        })
    }

    /// Progress of a slide's conversion.
    ///
    /// Falls back to the persisted descriptor for slides converted by an
    /// earlier process: a complete pyramid reports `complete` at 100, a
    /// partial one reports `failed` with the share of ready levels.
    pub async fn snapshot(&self, slide_id: &str) -> Result<JobSnapshot, ProgressError> {
        let not_found = match self.inner.progress.get(slide_id).await {
            Ok(snapshot) => return Ok(snapshot),
            Err(e) => e,
        };

        if self.inner.registry.get(slide_id).await.is_none() {
            return Err(not_found);
        }
        let Ok(descriptor) = self.inner.tiles.get_descriptor(slide_id).await else {
            return Err(not_found);
        };

        let snapshot = if descriptor.complete {
            JobSnapshot {
                slide_id: slide_id.to_string(),
                run: 0,
                status: JobStatus::Complete,
                progress: 100.0,
                error: None,
            }
        } else {
            JobSnapshot {
                slide_id: slide_id.to_string(),
                run: 0,
                status: JobStatus::Failed,
                progress: percent(descriptor.levels_ready as f64, descriptor.level_count),
                error: Some("conversion was interrupted".to_string()),
            }
        };
        Ok(snapshot)
    }
}

impl Inner {
    async fn run(self: Arc<Self>, job: Job) {
        let permit = tokio::select! {
            _ = job.gate.token().cancelled() => None,
            permit = self.workers.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.finish_cancelled(&job).await;
            return;
        };

        self.report(&job, JobStatus::Running, 0.0, None).await;
        info!(slide_id = %job.slide_id, run = job.run, "Conversion started");

        match self.convert(&job).await {
            Ok(levels) => {
                self.report(&job, JobStatus::Complete, 100.0, None).await;
                info!(slide_id = %job.slide_id, run = job.run, levels, "Conversion complete");
            }
            Err(ConvertError::Cancelled) => self.finish_cancelled(&job).await,
            Err(e) => {
                error!(slide_id = %job.slide_id, run = job.run, error = %e, "Conversion failed");
                self.report(&job, JobStatus::Failed, 0.0, Some(e.to_string()))
                    .await;
            }
        }
    }

    async fn finish_cancelled(&self, job: &Job) {
        info!(slide_id = %job.slide_id, run = job.run, "Conversion cancelled");
        // The slide is gone; drop the entry unless a newer run owns it
        if let Ok(current) = self.progress.get(&job.slide_id).await {
            if current.run == job.run && !job.gate.is_live() {
                self.progress.remove(&job.slide_id).await;
            }
        }
    }

    async fn report(&self, job: &Job, status: JobStatus, progress: f64, error: Option<String>) {
        match self
            .progress
            .set(&job.slide_id, job.run, status, progress, error)
            .await
        {
            Ok(_) => {}
            Err(ProgressError::NotFound { .. }) if !job.gate.is_live() => {}
            Err(e) => warn!(slide_id = %job.slide_id, error = %e, "Progress update rejected"),
        }
    }

    /// Run the conversion; returns the number of levels written.
    async fn convert(&self, job: &Job) -> Result<u32, ConvertError> {
        let slide_id = job.slide_id.as_str();

        self.registry
            .update_flags(slide_id, &job.gate, |r| {
                r.converted = false;
                r.viewable = false;
            })
            .await;
        if self.tiles.clear_pyramid(&job.gate, slide_id).await? == WriteOutcome::Cancelled {
            return Err(ConvertError::Cancelled);
        }

        let reader = self.opener.open(&job.path).await?;
        let (width, height) = reader.dimensions().ok_or_else(|| FormatError::Decode {
            message: "source has no full-resolution level".to_string(),
        })?;

        let options = job.options;
        let layout = PyramidLayout::new(width, height, options.tile_size, options.overlap);
        let encoder = TileEncoder::new(options.format, options.quality);
        let level_count = layout.level_count();

        debug!(
            slide_id,
            width,
            height,
            levels = level_count,
            tiles = layout.total_tiles(),
            "Pyramid layout"
        );

        for level in layout.levels() {
            let source_level = reader.best_level_for_downsample(layout.downsample(level.index));
            let (source_w, source_h) =
                reader
                    .level_dimensions(source_level)
                    .ok_or_else(|| FormatError::Decode {
                        message: format!("source has no level {}", source_level),
                    })?;
            let scale = (
                source_w as f64 / level.width.max(1) as f64,
                source_h as f64 / level.height.max(1) as f64,
            );
            let level_tiles = level.tile_count() as f64;
            let mut done = 0u64;

            for row in 0..level.rows {
                for col in 0..level.cols {
                    if !job.gate.is_live() {
                        return Err(ConvertError::Cancelled);
                    }

                    let Some(bounds) = layout.tile_bounds(level.index, col, row) else {
                        continue;
                    };
                    let data = {
                        let reader = reader.clone();
                        tokio::task::spawn_blocking(move || {
                            render_tile(reader.as_ref(), &encoder, source_level, scale, bounds)
                        })
                        .await
                        .map_err(|e| ConvertError::Worker(e.to_string()))??
                    };

                    let outcome = self
                        .tiles
                        .write_tile(&job.gate, slide_id, level.index, col, row, options.format, &data)
                        .await?;
                    if outcome == WriteOutcome::Cancelled {
                        return Err(ConvertError::Cancelled);
                    }

                    done += 1;
                    let progress = percent(level.index as f64 + done as f64 / level_tiles, level_count);
                    self.report(job, JobStatus::Running, progress, None).await;
                }
            }

            let descriptor = PyramidDescriptor::for_layout(&layout, options.format, level.index + 1);
            if self.tiles.publish_descriptor(&job.gate, slide_id, &descriptor).await?
                == WriteOutcome::Cancelled
            {
                return Err(ConvertError::Cancelled);
            }

            if level.index == 0 {
                self.registry
                    .update_flags(slide_id, &job.gate, |r| r.viewable = true)
                    .await;
                info!(slide_id, run = job.run, "Slide viewable");
            }
            debug!(slide_id, level = level.index, of = level_count, "Level complete");
        }

        self.registry
            .update_flags(slide_id, &job.gate, |r| {
                r.converted = true;
                r.viewable = true;
            })
            .await;
        Ok(level_count)
    }
}

/// Read, resize and encode one tile.
///
/// `scale` maps output pixels to source-level pixels per axis (>= 1).
fn render_tile(
    reader: &dyn SlideReader,
    encoder: &TileEncoder,
    source_level: usize,
    scale: (f64, f64),
    bounds: TileBounds,
) -> Result<bytes::Bytes, ConvertError> {
    let (level_w, level_h) =
        reader
            .level_dimensions(source_level)
            .ok_or(FormatError::RegionOutOfBounds {
                level: source_level,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
            })?;

    let (x, width) = source_span(bounds.x, bounds.width, scale.0, level_w);
    let (y, height) = source_span(bounds.y, bounds.height, scale.1, level_h);

    let region = reader.read_region(source_level, x, y, width, height)?;
    Ok(encoder.render(region, bounds.width, bounds.height)?)
}

/// Map an output span to the covering span of the source level.
fn source_span(start: u32, len: u32, scale: f64, extent: u32) -> (u32, u32) {
    let extent = extent.max(1);
    let begin = ((start as f64 * scale).floor() as u32).min(extent - 1);
    let end = (((start + len) as f64 * scale).ceil() as u32).clamp(begin + 1, extent);
    (begin, end - begin)
}

fn percent(levels_done: f64, level_count: u32) -> f64 {
    if level_count == 0 {
        return 100.0;
    }
    (levels_done / level_count as f64 * 100.0).clamp(0.0, 100.0)
}

// =============================================================================
// Tests
// =============================================================================
