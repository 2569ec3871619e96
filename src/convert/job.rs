use serde::Serialize;

/// Lifecycle of a conversion job.
///
/// ```text
/// Queued ──► Running ──► Complete
///                   └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    /// Queued or Running.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Complete or Failed.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

/// Point-in-time view of a slide's conversion job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub slide_id: String,

    /// Run number, unique per process and increasing
    pub run: u64,

    pub status: JobStatus,

    /// Percentage in 0..=100, non-decreasing within a run
    pub progress: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn queued(slide_id: impl Into<String>, run: u64) -> Self {
        Self {
            slide_id: slide_id.into(),
            run,
            status: JobStatus::Queued,
            progress: 0.0,
            error: None,
        }
    }
}

/// What `start` returns: the job's state right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,

    /// `false` when the call was coalesced into an already active job
    pub started: bool,
}
