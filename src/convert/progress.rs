//! Process-wide conversion progress.
//!
//! The tracker is an explicit key-value store injected into both the
//! converter (writer) and the query path (reader). Each slide's entry has its
//! own lock, so updates to one slide never wait on another.
//!
//! # Runs
//!
//! Every [`begin`](ProgressTracker::begin) that starts a job allocates a new
//! run number and replaces the slide's entry. Updates carry their run number
//! and are rejected with [`ProgressError::Superseded`] once a newer run owns
//! the entry, so a straggling job can never overwrite its successor.
//!
//! Within a run, progress never decreases and a terminal status is final.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::ProgressError;

use super::job::{JobSnapshot, JobStatus};

/// Result of [`ProgressTracker::begin`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// A new run was registered in Queued state.
    Started(JobSnapshot),

    /// A job is already Queued or Running; this is its current state.
    Active(JobSnapshot),
}

/// Per-slide conversion state, shared by the converter and HTTP handlers.
#[derive(Default)]
pub struct ProgressTracker {
    jobs: RwLock<HashMap<String, Arc<Mutex<JobSnapshot>>>>,
    next_run: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a slide's job.
    ///
    /// # Errors
    ///
    /// [`ProgressError::NotFound`] if no job was started in this process (or
    /// the slide has since been deleted).
    pub async fn get(&self, slide_id: &str) -> Result<JobSnapshot, ProgressError> {
        let entry = self
            .jobs
            .read()
            .await
            .get(slide_id)
            .cloned()
            .ok_or_else(|| ProgressError::NotFound {
                slide_id: slide_id.to_string(),
            })?;
        let snapshot = entry.lock().await.clone();
        Ok(snapshot)
    }

    /// Register a new run unless one is active.
    ///
    /// The check and the insert happen under one write lock, so concurrent
    /// callers for the same slide observe exactly one `Started`.
    pub(crate) async fn begin(&self, slide_id: &str) -> BeginOutcome {
        let mut jobs = self.jobs.write().await;

        if let Some(entry) = jobs.get(slide_id) {
            let current = entry.lock().await;
            if current.status.is_active() {
                return BeginOutcome::Active(current.clone());
            }
        }

        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = JobSnapshot::queued(slide_id, run);
        jobs.insert(
            slide_id.to_string(),
            Arc::new(Mutex::new(snapshot.clone())),
        );
        BeginOutcome::Started(snapshot)
    }

    /// Update a run's state.
    ///
    /// `progress` is clamped to 0..=100 and never lowers the stored value.
    /// `Complete` forces 100. Once the run is terminal, further updates are
    /// ignored and the stored snapshot is returned unchanged.
    pub(crate) async fn set(
        &self,
        slide_id: &str,
        run: u64,
        status: JobStatus,
        progress: f64,
        error: Option<String>,
    ) -> Result<JobSnapshot, ProgressError> {
        let entry = self
            .jobs
            .read()
            .await
            .get(slide_id)
            .cloned()
            .ok_or_else(|| ProgressError::NotFound {
                slide_id: slide_id.to_string(),
            })?;

        let mut current = entry.lock().await;
        if current.run != run {
            return Err(ProgressError::Superseded {
                slide_id: slide_id.to_string(),
                run,
            });
        }
        if current.status.is_terminal() {
            return Ok(current.clone());
        }

        let progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        current.progress = current.progress.max(progress);
        current.status = status;
        if status == JobStatus::Complete {
            current.progress = 100.0;
        }
        if error.is_some() {
            current.error = error;
        }

        Ok(current.clone())
    }

    /// Drop a slide's entry.
    pub async fn remove(&self, slide_id: &str) -> Option<JobSnapshot> {
        let entry = self.jobs.write().await.remove(slide_id)?;
        let snapshot = entry.lock().await.clone();
        Some(snapshot)
    }

    /// Number of tracked slides.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
