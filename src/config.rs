//! Engine configuration.

use std::time::Duration;

/// Configuration for the job engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrently running jobs on the light (I/O, light CPU) lane.
    pub max_concurrent_light: usize,
    /// Maximum concurrently running jobs on the heavy (CPU-bound, isolated) lane.
    pub max_concurrent_heavy: usize,
    /// Maximum queued (not yet running) jobs per lane. `None` means the
    /// queue is unbounded and submission never fails with `Saturated`.
    pub max_queue_depth: Option<usize>,
    /// How long terminal job records are retained before eviction.
    pub retention: Duration,
    /// Interval between garbage-collection sweeps of the result store.
    pub gc_interval: Duration,
    /// Grace period after cancellation before a heavy-lane job is aborted.
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_light: 4,
            max_concurrent_heavy: 2,
            max_queue_depth: None,
            retention: Duration::from_secs(300), // 5 minutes
            gc_interval: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Concurrency bound for a lane.
    pub fn lane_bound(&self, lane: crate::pool::Lane) -> usize {
        match lane {
            crate::pool::Lane::Light => self.max_concurrent_light,
            crate::pool::Lane::Heavy => self.max_concurrent_heavy,
        }
    }
}
