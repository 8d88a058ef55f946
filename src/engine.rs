//! Async engine — submit/status/get/cancel/shutdown orchestration.
//!
//! The engine is the only surface other layers talk to. It composes the
//! tool registry, the result store and the two-lane worker pool; the
//! protocol adapter maps named remote calls onto these methods and
//! serializes the returned records.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::job::{JobRecord, JobState, ResultStore};
use crate::pool::{Lane, WorkerPool};
use crate::tools::{ToolRegistry, validate_args};

/// Status snapshot for one job, as returned to the adapter layer.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub handle: Uuid,
    pub state: JobState,
    pub elapsed_ms: u64,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_jobs: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub light_running: usize,
    pub light_queued: usize,
    pub heavy_running: usize,
    pub heavy_queued: usize,
    pub registered_tools: usize,
}

/// The job-execution engine. One instance per server process; construct a
/// fresh one per test.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<ToolRegistry>,
    store: Arc<ResultStore>,
    pool: WorkerPool,
    accepting: AtomicBool,
    gc_shutdown: CancellationToken,
}

impl Engine {
    /// Start the engine: spawns the lane dispatchers and the record GC sweep.
    pub fn start(config: EngineConfig, registry: Arc<ToolRegistry>) -> Arc<Self> {
        let store = Arc::new(ResultStore::new());
        let pool = WorkerPool::new(
            Arc::clone(&store),
            config.max_concurrent_light,
            config.max_concurrent_heavy,
            config.max_queue_depth,
            config.cancel_grace,
        );

        let gc_shutdown = CancellationToken::new();
        {
            let store = Arc::clone(&store);
            let shutdown = gc_shutdown.clone();
            let interval = config.gc_interval;
            let retention = config.retention;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            store.evict_expired(retention).await;
                        }
                    }
                }
            });
        }

        tracing::info!(
            light = config.max_concurrent_light,
            heavy = config.max_concurrent_heavy,
            "Engine started"
        );

        Arc::new(Self {
            config,
            registry,
            store,
            pool,
            accepting: AtomicBool::new(true),
            gc_shutdown,
        })
    }

    /// Submit a unit of work; returns the job handle immediately.
    ///
    /// Fails with `UnknownTool` for an unregistered name and
    /// `InvalidArgument` when the arguments do not satisfy the tool's
    /// declared schema; in both cases no job record is created.
    pub async fn submit(&self, tool_name: &str, arguments: serde_json::Value) -> Result<Uuid> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::ShuttingDown);
        }

        let tool = self
            .registry
            .get(tool_name)
            .await
            .ok_or_else(|| EngineError::UnknownTool {
                name: tool_name.to_string(),
            })?;

        validate_args(&tool.input_schema(), &arguments).map_err(|reason| {
            EngineError::InvalidArgument {
                tool: tool_name.to_string(),
                reason,
            }
        })?;

        let record = JobRecord::new(tool_name);
        let handle = record.handle;
        let lane = tool.lane();

        // The record must exist before the pool can dequeue the job; roll
        // it back if admission fails.
        self.store.insert(record).await;
        if let Err(e) = self.pool.submit(lane, handle, tool, arguments).await {
            self.store.remove(handle).await;
            return Err(e);
        }

        tracing::info!(handle = %handle, tool = %tool_name, lane = %lane, "Job submitted");
        Ok(handle)
    }

    /// Current state and elapsed execution time for a job.
    pub async fn status(&self, handle: Uuid) -> Result<JobStatus> {
        let record = self
            .store
            .get(handle)
            .await
            .ok_or(EngineError::UnknownHandle { handle })?;
        Ok(JobStatus {
            handle,
            state: record.state,
            elapsed_ms: record.elapsed().as_millis() as u64,
        })
    }

    /// Fetch the result of a terminal job.
    ///
    /// `NotReady` while the job is Pending/Running; the stored failure
    /// (kind + message) if it Failed; `WasCancelled` if it was cancelled.
    pub async fn get(&self, handle: Uuid) -> Result<serde_json::Value> {
        let record = self
            .store
            .get(handle)
            .await
            .ok_or(EngineError::UnknownHandle { handle })?;

        match record.state {
            JobState::Pending | JobState::Running => Err(EngineError::NotReady {
                handle,
                state: record.state.to_string(),
            }),
            JobState::Completed => Ok(record.result.unwrap_or(serde_json::Value::Null)),
            JobState::Failed => {
                let failure = record.error.unwrap_or_else(|| {
                    crate::job::JobFailure::new("execution_failed", "no error recorded")
                });
                Err(EngineError::ToolFailure {
                    kind: failure.kind,
                    message: failure.message,
                })
            }
            JobState::Cancelled => Err(EngineError::WasCancelled { handle }),
        }
    }

    /// Request cancellation of a job.
    ///
    /// Idempotent: returns `true` while the job is not yet terminal (the
    /// request took effect), `false` once it is.
    pub async fn cancel(&self, handle: Uuid) -> Result<bool> {
        match self.store.request_cancel(handle).await {
            None => Err(EngineError::UnknownHandle { handle }),
            Some(false) => Ok(false),
            Some(true) => {
                self.pool.signal_cancel(handle).await;
                tracing::info!(handle = %handle, "Cancellation requested");
                Ok(true)
            }
        }
    }

    /// Shut the engine down.
    ///
    /// Stops accepting submissions, drains in-flight work for up to
    /// `drain_timeout`, then cancels everything that remains. Heavy-lane
    /// jobs that outlive the grace period are aborted.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!("Engine shutting down");
        }

        let deadline = Instant::now() + drain_timeout;
        while self.store.has_active().await && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        self.gc_shutdown.cancel();
        self.pool.stop_all().await;

        // Heavy runners abort themselves within the grace period; wait for
        // their terminal writes, then close out whatever is left.
        let grace_deadline = Instant::now() + self.config.cancel_grace + Duration::from_millis(100);
        while self.store.has_active().await && Instant::now() < grace_deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for handle in self.store.active_handles().await {
            self.store.force_cancel(handle).await;
        }

        tracing::info!("Engine stopped");
    }

    /// Handles of all non-terminal jobs.
    pub async fn active_jobs(&self) -> Vec<Uuid> {
        self.store.active_handles().await
    }

    /// Engine statistics snapshot.
    pub async fn stats(&self) -> EngineStats {
        let summary = self.store.summary().await;
        EngineStats {
            total_jobs: summary.total,
            pending: summary.pending,
            running: summary.running,
            completed: summary.completed,
            failed: summary.failed,
            cancelled: summary.cancelled,
            light_running: self.pool.running_count(Lane::Light),
            light_queued: self.pool.queued_count(Lane::Light),
            heavy_running: self.pool.running_count(Lane::Heavy),
            heavy_queued: self.pool.queued_count(Lane::Heavy),
            registered_tools: self.registry.count().await,
        }
    }

    /// The engine's tool registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
