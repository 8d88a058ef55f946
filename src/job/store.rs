//! Result store — exclusive owner of all job records.
//!
//! Every mutation happens under the store's write lock in a short critical
//! section, so no caller ever observes a half-updated record. The terminal
//! write for a job is a single critical section that checks the
//! cancellation flag and writes Cancelled-or-result, which arbitrates the
//! race between natural completion and cancellation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::job::record::{JobFailure, JobRecord, JobState};

/// In-memory map from handle to job record.
pub struct ResultStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

/// Per-state counts over all retained records.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreSummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a freshly created Pending record.
    pub async fn insert(&self, record: JobRecord) {
        self.records.write().await.insert(record.handle, record);
    }

    /// Snapshot a record by handle.
    pub async fn get(&self, handle: Uuid) -> Option<JobRecord> {
        self.records.read().await.get(&handle).cloned()
    }

    /// Check whether a handle is known.
    pub async fn contains(&self, handle: Uuid) -> bool {
        self.records.read().await.contains_key(&handle)
    }

    /// Attempt the Pending → Running transition at dequeue time.
    ///
    /// Returns false if the record is gone or already terminal (e.g. the
    /// job was cancelled while queued); the pool must then skip execution.
    pub async fn try_start(&self, handle: Uuid) -> bool {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&handle) else {
            return false;
        };
        if record.cancel_requested || record.state != JobState::Pending {
            return false;
        }
        // Pending → Running cannot fail after the checks above.
        record.transition_to(JobState::Running).is_ok()
    }

    /// Commit the terminal state for a job that was started.
    ///
    /// Single critical section covering "check cancel flag, set
    /// result-or-cancelled": if cancellation was requested first, the job
    /// ends Cancelled regardless of what execution returned. A job that is
    /// already terminal is left untouched.
    pub async fn finish(&self, handle: Uuid, outcome: Result<serde_json::Value, JobFailure>) {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(&handle) else {
            return;
        };
        if record.state.is_terminal() {
            return;
        }

        // A cancelled outcome from the execution side (cooperative bail-out
        // or abort) also ends the job Cancelled, even when the flag was set
        // through a path that bypassed this record (pool shutdown).
        let exec_cancelled = matches!(&outcome, Err(f) if f.kind == "cancelled");
        if record.cancel_requested || exec_cancelled {
            record.cancel_requested = true;
            let _ = record.transition_to(JobState::Cancelled);
            tracing::debug!(handle = %handle, "Job finished as cancelled");
            return;
        }

        match outcome {
            Ok(result) => {
                if record.transition_to(JobState::Completed).is_ok() {
                    record.result = Some(result);
                }
            }
            Err(failure) => {
                tracing::debug!(
                    handle = %handle,
                    kind = %failure.kind,
                    error = %failure.message,
                    "Job failed"
                );
                if record.transition_to(JobState::Failed).is_ok() {
                    record.error = Some(failure);
                }
            }
        }
    }

    /// Request cancellation of a job.
    ///
    /// Returns `None` for an unknown handle, `Some(false)` if the job is
    /// already terminal (the request had no effect), `Some(true)` otherwise.
    /// A Pending job is moved to Cancelled immediately; a Running job keeps
    /// running until its execution observes the signal, then ends Cancelled
    /// via [`finish`](Self::finish).
    pub async fn request_cancel(&self, handle: Uuid) -> Option<bool> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&handle)?;

        if record.state.is_terminal() {
            return Some(false);
        }

        record.cancel_requested = true;
        if record.state == JobState::Pending {
            let _ = record.transition_to(JobState::Cancelled);
        }
        Some(true)
    }

    /// Remove a record outright (admission-failure rollback).
    pub async fn remove(&self, handle: Uuid) {
        self.records.write().await.remove(&handle);
    }

    /// Cancel a job unconditionally if it is still active (shutdown path).
    pub async fn force_cancel(&self, handle: Uuid) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&handle)
            && !record.state.is_terminal()
        {
            record.cancel_requested = true;
            let _ = record.transition_to(JobState::Cancelled);
        }
    }

    /// Handles of all non-terminal jobs.
    pub async fn active_handles(&self) -> Vec<Uuid> {
        self.records
            .read()
            .await
            .iter()
            .filter(|(_, r)| !r.state.is_terminal())
            .map(|(h, _)| *h)
            .collect()
    }

    /// Whether any job is still non-terminal.
    pub async fn has_active(&self) -> bool {
        self.records
            .read()
            .await
            .values()
            .any(|r| !r.state.is_terminal())
    }

    /// Per-state counts.
    pub async fn summary(&self) -> StoreSummary {
        let records = self.records.read().await;

        let mut summary = StoreSummary::default();
        for record in records.values() {
            match record.state {
                JobState::Pending => summary.pending += 1,
                JobState::Running => summary.running += 1,
                JobState::Completed => summary.completed += 1,
                JobState::Failed => summary.failed += 1,
                JobState::Cancelled => summary.cancelled += 1,
            }
        }
        summary.total = records.len();
        summary
    }

    /// Evict terminal records older than the retention window.
    ///
    /// Returns the number of evicted records.
    pub async fn evict_expired(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !matches!(r.terminal_age(now), Some(age) if age >= retention));
        let evicted = before - records.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired job records");
        }
        evicted
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}
