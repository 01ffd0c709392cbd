//! Pollable progress state for catalog synchronization runs
//!
//! The tracker holds one [`SyncJob`] per scope. The active fetch run is the
//! only writer for its scope; any number of pollers may read snapshots.
//!
//! [`SyncProgressTracker::start`] returns a run id. The `*_run` variants of
//! the write operations only touch the job while it still belongs to that
//! run, so a run abandoned by the stall guard cannot overwrite its successor.
//!
//! There is no built-in timeout. Pollers must call
//! [`SyncProgressTracker::fail_stalled`] (or [`SyncProgressTracker::fail`]) to
//! abandon a job that stopped making progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::TrackerError;

/// Lifecycle state of a sync job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No run has been started
    #[default]
    Idle,
    /// A run is in progress
    Processing,
    /// The last run finished and its data was stored
    Completed,
    /// The last run failed or was abandoned
    Error,
}

impl SyncStatus {
    /// Whether the job reached a final state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Error)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Processing => write!(f, "processing"),
            SyncStatus::Completed => write!(f, "completed"),
            SyncStatus::Error => write!(f, "error"),
        }
    }
}

/// Progress snapshot of a running job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// Items processed so far
    pub current: usize,
    /// Expected number of items (at least `current`)
    pub total: usize,
    /// Human-readable stage label
    pub stage: String,
}

impl SyncProgress {
    /// Create a progress snapshot
    pub fn new(current: usize, total: usize, stage: impl Into<String>) -> Self {
        Self {
            current,
            total,
            stage: stage.into(),
        }
    }
}

/// Summary attached to a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Items fetched and stored
    pub synced_count: usize,
    /// Items the remote reported (or fetched, when unknown)
    pub total_count: usize,
    /// Wall-clock duration of the run
    pub duration_seconds: f64,
    /// Why the fetch loop stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// State of one synchronization run, as seen by pollers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    /// Scope the job belongs to
    pub scope: String,
    /// Lifecycle state
    pub status: SyncStatus,
    /// Latest progress snapshot
    pub progress: SyncProgress,
    /// Result summary once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SyncSummary>,
    /// Error message once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When progress last moved forward
    pub updated_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncJob {
    /// Job that has never run
    pub fn idle(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }
}

struct Entry {
    job: SyncJob,
    run: u64,
    last_progress: Instant,
}

/// In-memory tracker of sync jobs keyed by scope
#[derive(Default)]
pub struct SyncProgressTracker {
    jobs: RwLock<HashMap<String, Entry>>,
    next_run: AtomicU64,
}

impl SyncProgressTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new run for `scope`
    ///
    /// Replaces any terminal job for the scope with a fresh processing job and
    /// returns the id of the new run.
    pub async fn start(&self, scope: &str) -> Result<u64, TrackerError> {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get(scope) {
            if entry.job.status == SyncStatus::Processing {
                return Err(TrackerError::AlreadyRunning(scope.to_string()));
            }
        }

        let run = self.next_run.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Utc::now();
        jobs.insert(
            scope.to_string(),
            Entry {
                job: SyncJob {
                    scope: scope.to_string(),
                    status: SyncStatus::Processing,
                    progress: SyncProgress::new(0, 0, "Starting"),
                    result: None,
                    error: None,
                    started_at: Some(now),
                    updated_at: Some(now),
                    finished_at: None,
                },
                run,
                last_progress: Instant::now(),
            },
        );
        info!(scope, run, "Sync job started");
        Ok(run)
    }

    /// Overwrite the progress snapshot of a processing job
    ///
    /// A lower `current` than already reported is clamped. Updating a scope
    /// that never started is a no-op; updating a finished job is an error.
    pub async fn update(&self, scope: &str, progress: SyncProgress) -> Result<(), TrackerError> {
        self.write_progress(scope, None, progress).await
    }

    /// [`update`](Self::update) on behalf of `run`
    ///
    /// Fails with `AlreadyFinished` once the scope's job belongs to another run.
    pub async fn update_run(
        &self,
        scope: &str,
        run: u64,
        progress: SyncProgress,
    ) -> Result<(), TrackerError> {
        self.write_progress(scope, Some(run), progress).await
    }

    async fn write_progress(
        &self,
        scope: &str,
        run: Option<u64>,
        progress: SyncProgress,
    ) -> Result<(), TrackerError> {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(scope) else {
            debug!(scope, "Ignoring progress for unknown scope");
            return Ok(());
        };
        if run.is_some_and(|run| run != entry.run) {
            return Err(TrackerError::AlreadyFinished(scope.to_string()));
        }

        match entry.job.status {
            SyncStatus::Processing => {}
            SyncStatus::Idle => return Ok(()),
            SyncStatus::Completed | SyncStatus::Error => {
                return Err(TrackerError::AlreadyFinished(scope.to_string()));
            }
        }

        let previous = entry.job.progress.current;
        let mut progress = progress;
        if progress.current < previous {
            warn!(
                scope,
                previous,
                reported = progress.current,
                "Progress moved backwards; keeping previous value"
            );
            progress.current = previous;
        }
        progress.total = progress.total.max(progress.current);

        if progress.current > previous {
            entry.last_progress = Instant::now();
            entry.job.updated_at = Some(Utc::now());
        }
        entry.job.progress = progress;
        Ok(())
    }

    /// Mark the job completed
    pub async fn complete(&self, scope: &str, summary: SyncSummary) -> Result<(), TrackerError> {
        self.finish_completed(scope, None, summary).await
    }

    /// [`complete`](Self::complete) on behalf of `run`
    pub async fn complete_run(
        &self,
        scope: &str,
        run: u64,
        summary: SyncSummary,
    ) -> Result<(), TrackerError> {
        self.finish_completed(scope, Some(run), summary).await
    }

    async fn finish_completed(
        &self,
        scope: &str,
        run: Option<u64>,
        summary: SyncSummary,
    ) -> Result<(), TrackerError> {
        let mut jobs = self.jobs.write().await;
        let entry = Self::processing_entry(&mut jobs, scope, run)?;

        info!(
            scope,
            synced = summary.synced_count,
            total = summary.total_count,
            duration_secs = summary.duration_seconds,
            "Sync job completed"
        );
        entry.job.status = SyncStatus::Completed;
        entry.job.progress.stage = "Completed".to_string();
        entry.job.result = Some(summary);
        entry.job.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job failed
    pub async fn fail(&self, scope: &str, error: impl Into<String>) -> Result<(), TrackerError> {
        self.finish_failed(scope, None, error.into()).await
    }

    /// [`fail`](Self::fail) on behalf of `run`
    pub async fn fail_run(
        &self,
        scope: &str,
        run: u64,
        error: impl Into<String>,
    ) -> Result<(), TrackerError> {
        self.finish_failed(scope, Some(run), error.into()).await
    }

    async fn finish_failed(
        &self,
        scope: &str,
        run: Option<u64>,
        error: String,
    ) -> Result<(), TrackerError> {
        let mut jobs = self.jobs.write().await;
        let entry = Self::processing_entry(&mut jobs, scope, run)?;

        warn!(scope, error = %error, "Sync job failed");
        entry.job.status = SyncStatus::Error;
        entry.job.progress.stage = "Failed".to_string();
        entry.job.error = Some(error);
        entry.job.finished_at = Some(Utc::now());
        Ok(())
    }

    fn processing_entry<'a>(
        jobs: &'a mut HashMap<String, Entry>,
        scope: &str,
        run: Option<u64>,
    ) -> Result<&'a mut Entry, TrackerError> {
        match jobs.get_mut(scope) {
            Some(entry) if run.is_some_and(|run| run != entry.run) => {
                Err(TrackerError::AlreadyFinished(scope.to_string()))
            }
            Some(entry) if entry.job.status == SyncStatus::Processing => Ok(entry),
            Some(entry) if entry.job.status.is_terminal() => {
                Err(TrackerError::AlreadyFinished(scope.to_string()))
            }
            _ => Err(TrackerError::NotRunning(scope.to_string())),
        }
    }

    /// Snapshot of the job for `scope` (idle when never started)
    pub async fn get(&self, scope: &str) -> SyncJob {
        self.jobs
            .read()
            .await
            .get(scope)
            .map(|entry| entry.job.clone())
            .unwrap_or_else(|| SyncJob::idle(scope))
    }

    /// Whether a run is processing for `scope`
    pub async fn is_running(&self, scope: &str) -> bool {
        self.get(scope).await.status == SyncStatus::Processing
    }

    /// Snapshots of every known job
    pub async fn jobs(&self) -> Vec<SyncJob> {
        let mut jobs: Vec<SyncJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|entry| entry.job.clone())
            .collect();
        jobs.sort_by(|a, b| a.scope.cmp(&b.scope));
        jobs
    }

    /// Scopes whose processing job made no progress for at least `max_idle`
    pub async fn stalled(&self, max_idle: Duration) -> Vec<String> {
        self.stalled_runs(max_idle)
            .await
            .into_iter()
            .map(|(scope, _)| scope)
            .collect()
    }

    async fn stalled_runs(&self, max_idle: Duration) -> Vec<(String, u64)> {
        let now = Instant::now();
        let mut runs: Vec<(String, u64)> = self
            .jobs
            .read()
            .await
            .iter()
            .filter(|(_, entry)| {
                entry.job.status == SyncStatus::Processing
                    && now.duration_since(entry.last_progress) >= max_idle
            })
            .map(|(scope, entry)| (scope.clone(), entry.run))
            .collect();
        runs.sort();
        runs
    }

    /// Fail every stalled job and return the affected scopes
    pub async fn fail_stalled(&self, max_idle: Duration) -> Vec<String> {
        self.fail_stalled_runs(max_idle)
            .await
            .into_iter()
            .map(|(scope, _)| scope)
            .collect()
    }

    /// Fail every stalled job and return the affected scopes with their runs
    pub async fn fail_stalled_runs(&self, max_idle: Duration) -> Vec<(String, u64)> {
        let mut failed = Vec::new();
        for (scope, run) in self.stalled_runs(max_idle).await {
            let message = format!(
                "Sync stalled: no progress for {} minutes",
                max_idle.as_secs() / 60
            );
            // A concurrent finish between the scan and here is not a stall.
            if self.fail_run(&scope, run, message).await.is_ok() {
                failed.push((scope, run));
            }
        }
        failed
    }
}
