//! In-memory job tracking for asynchronous document runs.
//!
//! ## Why a tracker at all?
//!
//! The [`crate::process::process`] future resolves once, at the end.
//! Anything that wants to *observe* a run while it is underway — a web
//! handler answering "how far along is job X?", a TUI redrawing a status
//! panel — needs a snapshot it can poll. [`JobTracker`] is that seam: a
//! shared map of [`Job`] records, updated from the pipeline's progress
//! callback, read by anyone holding a clone of the tracker.
//!
//! Records are plain values behind an `RwLock`; [`JobTracker::snapshot`]
//! clones the record out, so readers never hold the lock across their own
//! work and never observe a half-applied update.
//!
//! ## Lifecycle
//!
//! ```text
//!  create()          spawn-side            terminal
//!  ────────►  queued ────────►  running ────────►  completed
//!                                 │
//!                                 └───────────────►  error
//! ```
//!
//! Progress only moves forward: [`JobTracker::update_progress`] clamps to
//! the highest value seen, so a poller never watches the bar run backwards.
//! Finished records stay in the map until explicitly removed with
//! [`JobTracker::discard`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProcessingConfig;
use crate::detector::TextDetector;
use crate::output::DocumentResult;
use crate::process::{process, ProcessingStage};
use crate::progress::ProcessingProgressCallback;

/// Where a job currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet picked up.
    Queued,
    /// Pipeline is executing.
    Running,
    /// Finished; [`Job::result`] holds the document result.
    Completed,
    /// Finished; [`Job::error`] holds the failure message.
    Error,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// One tracked document run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// The PDF this job is processing.
    pub input: PathBuf,
    pub status: JobStatus,
    /// Overall progress, 0–100, monotonic non-decreasing.
    pub progress: u8,
    /// Human-readable description of the current stage.
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentResult>,
}

impl Job {
    fn new(input: PathBuf) -> Self {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            input,
            status: JobStatus::Queued,
            progress: 0,
            message: "queued".into(),
            created_at: now,
            updated_at: now,
            error: None,
            result: None,
        }
    }

    /// True once the job can no longer change.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Error)
    }
}

/// Shared, cloneable registry of [`Job`] records.
///
/// Cloning is cheap (one `Arc`); every clone sees the same records.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queued job for `input` and return its id.
    pub fn create(&self, input: impl Into<PathBuf>) -> Uuid {
        let job = Job::new(input.into());
        let id = job.id;
        self.jobs.write().insert(id, job);
        debug!("Job {id} created");
        id
    }

    /// Move a queued job to running. No-op for unknown or finished jobs.
    pub fn mark_running(&self, id: Uuid) {
        self.with_live(id, |job| {
            job.status = JobStatus::Running;
            job.message = "running".into();
        });
    }

    /// Record progress for a running job.
    ///
    /// Progress is clamped to the highest value seen so far; the message
    /// always updates. Out-of-order callbacks therefore cannot move the
    /// bar backwards but do keep the stage label fresh.
    pub fn update_progress(&self, id: Uuid, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100);
        self.with_live(id, |job| {
            job.progress = job.progress.max(percent);
            job.message = message.into();
        });
    }

    /// Terminal success: attach the result and pin progress at 100.
    pub fn complete(&self, id: Uuid, result: DocumentResult) {
        self.with_live(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.message = "completed".into();
            job.result = Some(result);
        });
        info!("Job {id} completed");
    }

    /// Terminal failure: attach the error message.
    pub fn fail(&self, id: Uuid, error: impl Into<String>) {
        let error = error.into();
        warn!("Job {id} failed: {error}");
        self.with_live(id, |job| {
            job.status = JobStatus::Error;
            job.message = "error".into();
            job.error = Some(error);
        });
    }

    /// Point-in-time copy of one job, if it exists.
    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Point-in-time copies of every tracked job, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut all: Vec<Job> = self.jobs.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Drop a job record. Returns whether anything was removed.
    ///
    /// Discarding a running job only forgets the record; the underlying
    /// task keeps going and its later updates land nowhere.
    pub fn discard(&self, id: Uuid) -> bool {
        self.jobs.write().remove(&id).is_some()
    }

    /// Run the full pipeline for `input` under a tracked job.
    ///
    /// Returns the job id immediately; the pipeline runs on a spawned task
    /// that keeps the record updated through the progress callback. Poll
    /// [`JobTracker::snapshot`] for status, progress, and the final result.
    pub fn spawn(
        &self,
        input: impl Into<PathBuf>,
        detector: Arc<dyn TextDetector>,
        config: &ProcessingConfig,
    ) -> Uuid {
        let input = input.into();
        let id = self.create(&input);

        let mut config = config.clone();
        config.progress_callback = Some(Arc::new(JobProgress {
            tracker: self.clone(),
            id,
        }));

        let tracker = self.clone();
        tokio::spawn(async move {
            tracker.mark_running(id);
            match process(&input, detector, &config).await {
                Ok(result) => tracker.complete(id, result),
                Err(e) => tracker.fail(id, e.to_string()),
            }
        });

        id
    }

    /// Apply `f` to a job unless it has already reached a terminal state.
    fn with_live(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id) {
            Some(job) if !job.is_finished() => {
                f(job);
                job.updated_at = Utc::now();
            }
            Some(_) => debug!("Ignoring update to finished job {id}"),
            None => debug!("Ignoring update to unknown job {id}"),
        }
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("jobs", &self.jobs.read().len())
            .finish()
    }
}

/// Bridges pipeline progress events into tracker updates.
struct JobProgress {
    tracker: JobTracker,
    id: Uuid,
}

impl ProcessingProgressCallback for JobProgress {
    fn on_stage_change(&self, stage: ProcessingStage, percent: u8) {
        self.tracker.update_progress(self.id, percent, stage.to_string());
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: String) {
        debug!(
            "Job {}: page {page_num}/{total_pages} degraded: {error}",
            self.id
        );
    }
}
