//! Job state machine and record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Job is queued, waiting for a lane slot.
    Pending,
    /// Job is currently executing.
    Running,
    /// Job finished and produced a result.
    Completed,
    /// Job execution raised an error.
    Failed,
    /// Job was cancelled before or during execution.
    Cancelled,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Structured failure captured from a tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Stable failure-kind string (e.g. `execution_failed`, `panic`).
    pub kind: String,
    /// Human-readable message, surfaced verbatim on `get`.
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Record tracking one submitted unit of work.
///
/// Records are owned exclusively by the [`ResultStore`](crate::job::store::ResultStore);
/// the worker pool mutates them only through store methods, under the store
/// lock. `result` and `error` are mutually exclusive and both unset while
/// the job is non-terminal.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    /// Process-unique opaque handle, generated at submission, never reused.
    pub handle: Uuid,
    /// Current state.
    pub state: JobState,
    /// Name of the tool producing this job.
    pub tool_name: String,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload, present only in the Completed state.
    pub result: Option<serde_json::Value>,
    /// Structured error, present only in the Failed state.
    pub error: Option<JobFailure>,
    /// Monotonic cancellation flag; once true, stays true.
    pub cancel_requested: bool,
}

impl JobRecord {
    /// Create a fresh Pending record with a new handle.
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            handle: Uuid::new_v4(),
            state: JobState::Pending,
            tool_name: tool_name.into(),
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// Transition to a new state, updating timestamps.
    ///
    /// Callers must hold the store lock; the transition matrix rejects any
    /// move out of a terminal state.
    pub fn transition_to(&mut self, target: JobState) -> Result<(), String> {
        if !self.state.can_transition_to(target) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, target
            ));
        }

        self.state = target;

        match target {
            JobState::Running if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            JobState::Completed | JobState::Failed | JobState::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }

        Ok(())
    }

    /// Time spent executing: from start until terminal (or now, if still
    /// running). Zero while pending.
    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(start) => {
                let end = self.completed_at.unwrap_or_else(Utc::now);
                let millis = end.signed_duration_since(start).num_milliseconds();
                Duration::from_millis(millis.max(0) as u64)
            }
            None => Duration::ZERO,
        }
    }

    /// How long ago the job reached a terminal state, if it has.
    pub fn terminal_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.state.is_terminal() {
            return None;
        }
        self.completed_at.map(|done| {
            let millis = now.signed_duration_since(done).num_milliseconds();
            Duration::from_millis(millis.max(0) as u64)
        })
    }
}
