//! Background pyramid conversion and progress tracking.
//!
//! - [`Converter`]: starts one job per slide on a bounded worker pool
//! - [`ProgressTracker`]: per-slide job state, polled by clients
//! - [`JobSnapshot`] / [`JobStatus`]: what polling returns

mod converter;
mod job;
mod progress;

pub use converter::{ConvertOptions, Converter, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE, DEFAULT_WORKERS};
pub use job::{JobHandle, JobSnapshot, JobStatus};
pub use progress::{BeginOutcome, ProgressTracker};
