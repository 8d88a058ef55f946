//! Two-lane worker pool — bounded execution with FIFO backpressure.
//!
//! Each lane is an unbounded FIFO channel drained by a dispatcher task that
//! acquires a semaphore permit before spawning the runner, so jobs start in
//! submission order and the number of running jobs never exceeds the lane
//! bound. Excess work queues; it is only rejected when an explicit queue
//! depth is configured, or during shutdown.
//!
//! Cancellation is cooperative on the light lane (the tool must observe its
//! token) and enforced on the heavy lane: a cancelled heavy job that has
//! not returned within the grace period is aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::EngineError;
use crate::job::{JobFailure, ResultStore};
use crate::tools::Tool;

/// Which worker lane a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Cooperative lane for I/O and light CPU work.
    Light,
    /// Isolated lane for CPU-heavy work; cancellation is enforced.
    Heavy,
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Heavy => write!(f, "heavy"),
        }
    }
}

/// A job waiting in a lane queue.
struct QueuedJob {
    handle: Uuid,
    tool: Arc<dyn Tool>,
    args: serde_json::Value,
    cancel: CancellationToken,
}

/// Sender side and bookkeeping for one lane.
struct LaneQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    queued: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
    bound: usize,
    max_depth: Option<usize>,
}

/// Bounded two-lane execution substrate.
pub struct WorkerPool {
    light: LaneQueue,
    heavy: LaneQueue,
    /// Cancellation tokens for every admitted, not-yet-finished job.
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Parent of every job token; cancelling it signals the whole pool.
    shutdown: CancellationToken,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create the pool and spawn its lane dispatchers.
    pub fn new(
        store: Arc<ResultStore>,
        max_concurrent_light: usize,
        max_concurrent_heavy: usize,
        max_queue_depth: Option<usize>,
        cancel_grace: Duration,
    ) -> Self {
        let tokens = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let mut dispatchers = Vec::with_capacity(2);

        let mut make_lane = |lane: Lane, bound: usize| {
            let (tx, rx) = mpsc::unbounded_channel();
            let queued = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(bound));
            dispatchers.push(tokio::spawn(dispatch(
                lane,
                rx,
                Arc::clone(&queued),
                Arc::clone(&semaphore),
                Arc::clone(&store),
                Arc::clone(&tokens),
                shutdown.clone(),
                cancel_grace,
            )));
            LaneQueue {
                tx,
                queued,
                semaphore,
                bound,
                max_depth: max_queue_depth,
            }
        };

        let light = make_lane(Lane::Light, max_concurrent_light);
        let heavy = make_lane(Lane::Heavy, max_concurrent_heavy);

        Self {
            light,
            heavy,
            tokens,
            shutdown,
            dispatchers: Mutex::new(dispatchers),
        }
    }

    fn lane(&self, lane: Lane) -> &LaneQueue {
        match lane {
            Lane::Light => &self.light,
            Lane::Heavy => &self.heavy,
        }
    }

    /// Enqueue a job onto a lane.
    ///
    /// The job's record must already exist in the result store. Fails only
    /// when the lane's configured queue depth is reached or the pool is
    /// shutting down; otherwise excess work waits in FIFO order.
    pub async fn submit(
        &self,
        lane: Lane,
        handle: Uuid,
        tool: Arc<dyn Tool>,
        args: serde_json::Value,
    ) -> Result<(), EngineError> {
        if self.shutdown.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }

        let queue = self.lane(lane);
        if let Some(max) = queue.max_depth {
            let depth = queue.queued.load(Ordering::Acquire);
            if depth >= max {
                return Err(EngineError::Saturated {
                    lane: lane.to_string(),
                    depth,
                });
            }
        }

        let cancel = self.shutdown.child_token();
        self.tokens.write().await.insert(handle, cancel.clone());
        queue.queued.fetch_add(1, Ordering::AcqRel);

        let job = QueuedJob {
            handle,
            tool,
            args,
            cancel,
        };
        if queue.tx.send(job).is_err() {
            queue.queued.fetch_sub(1, Ordering::AcqRel);
            self.tokens.write().await.remove(&handle);
            return Err(EngineError::ShuttingDown);
        }

        tracing::debug!(handle = %handle, lane = %lane, "Job enqueued");
        Ok(())
    }

    /// Signal cancellation to a job's execution, if it is still tracked.
    pub async fn signal_cancel(&self, handle: Uuid) {
        if let Some(token) = self.tokens.read().await.get(&handle) {
            token.cancel();
        }
    }

    /// Jobs currently running on a lane.
    pub fn running_count(&self, lane: Lane) -> usize {
        let queue = self.lane(lane);
        queue.bound - queue.semaphore.available_permits()
    }

    /// Jobs queued (admitted but not yet started) on a lane.
    pub fn queued_count(&self, lane: Lane) -> usize {
        self.lane(lane).queued.load(Ordering::Acquire)
    }

    /// Stop the pool: cancel every job token, stop both dispatchers, and
    /// mark still-queued jobs Cancelled. Running jobs observe their tokens;
    /// heavy-lane runners abort themselves after the grace period.
    pub async fn stop_all(&self) {
        // Child tokens of the shutdown token cancel with it.
        self.shutdown.cancel();

        let mut dispatchers = self.dispatchers.lock().await;
        for result in futures::future::join_all(dispatchers.drain(..)).await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                tracing::warn!(error = %e, "Lane dispatcher ended abnormally");
            }
        }
    }
}

/// Per-lane dispatcher: dequeue in FIFO order, wait for a free slot, then
/// hand the job to a runner task.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    lane: Lane,
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    queued: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
    store: Arc<ResultStore>,
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    shutdown: CancellationToken,
    cancel_grace: Duration,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            recv = rx.recv() => match recv {
                Some(job) => job,
                None => break,
            },
        };

        // The job stays counted as queued until it actually starts (or is
        // skipped), so the depth limit covers head-of-line waiters too.
        let permit = tokio::select! {
            _ = shutdown.cancelled() => {
                queued.fetch_sub(1, Ordering::AcqRel);
                store.force_cancel(job.handle).await;
                tokens.write().await.remove(&job.handle);
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        queued.fetch_sub(1, Ordering::AcqRel);

        // Cancelled while queued: the record is already terminal, skip it.
        if !store.try_start(job.handle).await {
            tokens.write().await.remove(&job.handle);
            continue;
        }

        tracing::debug!(handle = %job.handle, lane = %lane, "Job started");

        let store = Arc::clone(&store);
        let tokens = Arc::clone(&tokens);
        tokio::spawn(async move {
            run_job(lane, job, store, tokens, cancel_grace).await;
            drop(permit);
        });
    }

    // Drain anything still queued as cancelled.
    while let Ok(job) = rx.try_recv() {
        queued.fetch_sub(1, Ordering::AcqRel);
        store.force_cancel(job.handle).await;
        tokens.write().await.remove(&job.handle);
    }
}

/// Execute one job and commit its terminal state.
async fn run_job(
    lane: Lane,
    job: QueuedJob,
    store: Arc<ResultStore>,
    tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    cancel_grace: Duration,
) {
    let QueuedJob {
        handle,
        tool,
        args,
        cancel,
    } = job;

    // The tool body runs on its own task so a panic is contained there and
    // the heavy lane has a unit it can abort.
    let exec_cancel = cancel.clone();
    let mut exec = tokio::spawn(async move { tool.execute(args, exec_cancel).await });

    let outcome = match lane {
        Lane::Light => join_outcome(&mut exec).await,
        Lane::Heavy => {
            tokio::select! {
                outcome = join_outcome(&mut exec) => outcome,
                _ = cancel.cancelled() => {
                    // Grace period for the worker to return on its own.
                    let graced = tokio::time::timeout(cancel_grace, join_outcome(&mut exec)).await;
                    match graced {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            tracing::warn!(handle = %handle, "Heavy job exceeded grace period, aborting");
                            exec.abort();
                            let _ = exec.await;
                            Err(JobFailure::new("cancelled", "terminated after grace period"))
                        }
                    }
                }
            }
        }
    };

    store.finish(handle, outcome).await;
    tokens.write().await.remove(&handle);
}

/// Map the joined execution result into a terminal outcome, converting a
/// panic into a Failed record instead of losing the job.
async fn join_outcome(
    exec: &mut JoinHandle<Result<serde_json::Value, crate::tools::ToolError>>,
) -> Result<serde_json::Value, JobFailure> {
    match exec.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(JobFailure::from(&e)),
        Err(e) if e.is_panic() => Err(panic_failure(e)),
        Err(_) => Err(JobFailure::new("cancelled", "execution task was aborted")),
    }
}

fn panic_failure(e: JoinError) -> JobFailure {
    JobFailure::new("panic", format!("tool panicked: {e}"))
}
