//! End-to-end engine behavior: submission, polling, cancellation, lane
//! bounds, failure isolation, saturation, garbage collection and shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use jobcore::{Engine, EngineConfig, JobState, Lane, Tool, ToolError, ToolRegistry};

/// Deterministic tool: echoes its message.
struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Returns its input"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        Ok(json!({"echo": args["message"]}))
    }
}

/// Sleeps for `millis`, checking for cancellation.
struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }
    fn description(&self) -> &str {
        "Sleeps for a given number of milliseconds"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"millis": {"type": "integer"}},
            "required": ["millis"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        let millis = args["millis"].as_u64().unwrap_or(10);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(json!({"slept_ms": millis})),
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }
}

/// Always fails with the provided reason.
struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Deliberately raises"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"reason": {"type": "string"}},
            "required": ["reason"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        Err(ToolError::execution_failed(
            args["reason"].as_str().unwrap_or("unknown"),
        ))
    }
}

/// Records its `index` argument into a shared log when it completes.
struct OrderTool {
    log: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Tool for OrderTool {
    fn name(&self) -> &str {
        "order"
    }
    fn description(&self) -> &str {
        "Logs its completion order"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {"index": {"type": "integer"}},
            "required": ["index"]
        })
    }
    async fn execute(
        &self,
        args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let index = args["index"].as_u64().unwrap_or(0);
        self.log.lock().await.push(index);
        Ok(json!({"index": index}))
    }
}

/// Heavy-lane tool that never observes its cancellation token.
struct StubbornTool;

#[async_trait]
impl Tool for StubbornTool {
    fn name(&self) -> &str {
        "stubborn"
    }
    fn description(&self) -> &str {
        "Ignores cancellation"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    fn lane(&self) -> Lane {
        Lane::Heavy
    }
    async fn execute(
        &self,
        _args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!("unreachable"))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

async fn build_engine(config: EngineConfig) -> Arc<Engine> {
    init_tracing();
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(EchoTool)).await;
    registry.register(Arc::new(SleepTool)).await;
    registry.register(Arc::new(FailTool)).await;
    registry.register(Arc::new(StubbornTool)).await;
    Engine::start(config, registry)
}

async fn wait_terminal(engine: &Engine, handle: Uuid) -> JobState {
    for _ in 0..1000 {
        let status = engine.status(handle).await.unwrap();
        if status.state.is_terminal() {
            return status.state;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {handle} never reached a terminal state");
}

#[tokio::test]
async fn round_trip_submit_poll_get() {
    let engine = build_engine(EngineConfig::default()).await;

    let handle = engine
        .submit("echo", json!({"message": "analysis done"}))
        .await
        .unwrap();

    assert_eq!(wait_terminal(&engine, handle).await, JobState::Completed);
    assert_eq!(
        engine.get(handle).await.unwrap(),
        json!({"echo": "analysis done"})
    );

    // The result is stable across repeated gets.
    assert_eq!(
        engine.get(handle).await.unwrap(),
        json!({"echo": "analysis done"})
    );
}

#[tokio::test]
async fn get_before_terminal_is_not_ready() {
    let engine = build_engine(EngineConfig::default()).await;

    let handle = engine.submit("sleep", json!({"millis": 500})).await.unwrap();

    let err = engine.get(handle).await.unwrap_err();
    assert_eq!(err.kind(), "NotReady");

    engine.cancel(handle).await.unwrap();
    wait_terminal(&engine, handle).await;
}

#[tokio::test]
async fn cancel_pending_job_yields_cancelled() {
    let engine = build_engine(EngineConfig {
        max_concurrent_light: 1,
        ..Default::default()
    })
    .await;

    // Occupy the single light slot so the next job stays Pending.
    let blocker = engine.submit("sleep", json!({"millis": 500})).await.unwrap();
    let pending = engine.submit("sleep", json!({"millis": 500})).await.unwrap();

    assert!(engine.cancel(pending).await.unwrap());

    // Deterministic: a cancelled Pending job is terminal immediately.
    let status = engine.status(pending).await.unwrap();
    assert_eq!(status.state, JobState::Cancelled);
    let err = engine.get(pending).await.unwrap_err();
    assert_eq!(err.kind(), "WasCancelled");

    engine.cancel(blocker).await.unwrap();
    assert_eq!(wait_terminal(&engine, blocker).await, JobState::Cancelled);
}

#[tokio::test]
async fn double_cancel_is_idempotent() {
    // The stubborn tool never returns on its own, so the record stays
    // Running through the grace period and both early cancels are
    // acknowledged.
    let engine = build_engine(EngineConfig {
        cancel_grace: Duration::from_millis(200),
        ..Default::default()
    })
    .await;

    let handle = engine.submit("stubborn", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(engine.cancel(handle).await.unwrap());
    assert!(engine.cancel(handle).await.unwrap());

    assert_eq!(wait_terminal(&engine, handle).await, JobState::Cancelled);
    // Terminal now: further cancels are a no-op.
    assert!(!engine.cancel(handle).await.unwrap());
    assert!(!engine.cancel(handle).await.unwrap());
}

#[tokio::test]
async fn cancel_running_job_cooperatively() {
    let engine = build_engine(EngineConfig::default()).await;

    let handle = engine
        .submit("sleep", json!({"millis": 5000}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.status(handle).await.unwrap().state, JobState::Running);

    assert!(engine.cancel(handle).await.unwrap());
    assert_eq!(wait_terminal(&engine, handle).await, JobState::Cancelled);
    assert_eq!(engine.get(handle).await.unwrap_err().kind(), "WasCancelled");
}

#[tokio::test]
async fn heavy_job_ignoring_token_is_aborted() {
    let engine = build_engine(EngineConfig {
        cancel_grace: Duration::from_millis(50),
        ..Default::default()
    })
    .await;

    let handle = engine.submit("stubborn", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(engine.cancel(handle).await.unwrap());
    assert_eq!(wait_terminal(&engine, handle).await, JobState::Cancelled);
}

#[tokio::test]
async fn fifo_order_with_single_slot() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(Arc::new(OrderTool {
            log: Arc::clone(&log),
        }))
        .await;
    let engine = Engine::start(
        EngineConfig {
            max_concurrent_light: 1,
            ..Default::default()
        },
        registry,
    );

    let mut handles = Vec::new();
    for index in 1..=3u64 {
        handles.push(engine.submit("order", json!({"index": index})).await.unwrap());
    }

    // Exactly one job runs at a time; the others wait their turn.
    tokio::time::sleep(Duration::from_millis(15)).await;
    let stats = engine.stats().await;
    assert_eq!(stats.running, 1);
    assert_eq!(stats.pending, 2);

    for handle in &handles {
        assert_eq!(wait_terminal(&engine, *handle).await, JobState::Completed);
    }
    assert_eq!(*log.lock().await, vec![1, 2, 3]);
}

#[tokio::test]
async fn lane_bound_holds_under_load() {
    let engine = build_engine(EngineConfig {
        max_concurrent_light: 2,
        ..Default::default()
    })
    .await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(engine.submit("sleep", json!({"millis": 40})).await.unwrap());
    }

    for _ in 0..30 {
        let stats = engine.stats().await;
        assert!(
            stats.light_running <= 2,
            "light lane exceeded its bound: {}",
            stats.light_running
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for handle in handles {
        assert_eq!(wait_terminal(&engine, handle).await, JobState::Completed);
    }
}

#[tokio::test]
async fn failing_tool_surfaces_tool_failure_and_engine_survives() {
    let engine = build_engine(EngineConfig::default()).await;

    let handle = engine
        .submit("fail", json!({"reason": "syntax tree exploded"}))
        .await
        .unwrap();

    assert_eq!(wait_terminal(&engine, handle).await, JobState::Failed);
    let err = engine.get(handle).await.unwrap_err();
    assert_eq!(err.kind(), "ToolFailure");
    assert!(err.to_string().contains("syntax tree exploded"));

    // The engine keeps working after a tool failure.
    let next = engine.submit("echo", json!({"message": "ok"})).await.unwrap();
    assert_eq!(wait_terminal(&engine, next).await, JobState::Completed);
}

#[tokio::test]
async fn unknown_tool_never_creates_a_record() {
    let engine = build_engine(EngineConfig::default()).await;

    let err = engine
        .submit("nonexistent", json!({"message": "x"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "UnknownTool");

    assert_eq!(engine.stats().await.total_jobs, 0);
    assert!(engine.active_jobs().await.is_empty());
}

#[tokio::test]
async fn invalid_arguments_fail_fast() {
    let engine = build_engine(EngineConfig::default()).await;

    // Missing required field.
    let err = engine.submit("echo", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");

    // Wrong type.
    let err = engine
        .submit("sleep", json!({"millis": "soon"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArgument");

    assert_eq!(engine.stats().await.total_jobs, 0);
}

#[tokio::test]
async fn queue_depth_limit_saturates() {
    let engine = build_engine(EngineConfig {
        max_concurrent_light: 1,
        max_queue_depth: Some(1),
        ..Default::default()
    })
    .await;

    let first = engine.submit("sleep", json!({"millis": 300})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = engine.submit("sleep", json!({"millis": 300})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = engine
        .submit("sleep", json!({"millis": 300}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Saturated");
    // The rejected submission left no record behind.
    assert_eq!(engine.stats().await.total_jobs, 2);

    engine.cancel(first).await.unwrap();
    engine.cancel(second).await.unwrap();
}

#[tokio::test]
async fn terminal_records_are_garbage_collected() {
    let engine = build_engine(EngineConfig {
        retention: Duration::ZERO,
        gc_interval: Duration::from_millis(25),
        ..Default::default()
    })
    .await;

    let handle = engine
        .submit("echo", json!({"message": "ephemeral"}))
        .await
        .unwrap();
    assert_eq!(wait_terminal(&engine, handle).await, JobState::Completed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.status(handle).await.unwrap_err().kind(), "UnknownHandle");
    assert_eq!(engine.get(handle).await.unwrap_err().kind(), "UnknownHandle");
    assert_eq!(engine.cancel(handle).await.unwrap_err().kind(), "UnknownHandle");
}

#[tokio::test]
async fn shutdown_drains_short_jobs() {
    let engine = build_engine(EngineConfig::default()).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(engine.submit("sleep", json!({"millis": 30})).await.unwrap());
    }

    engine.shutdown(Duration::from_secs(2)).await;

    for handle in handles {
        assert_eq!(
            engine.status(handle).await.unwrap().state,
            JobState::Completed
        );
    }
}

#[tokio::test]
async fn shutdown_cancels_what_does_not_drain() {
    let engine = build_engine(EngineConfig {
        max_concurrent_light: 1,
        cancel_grace: Duration::from_millis(50),
        ..Default::default()
    })
    .await;

    let running = engine
        .submit("sleep", json!({"millis": 10_000}))
        .await
        .unwrap();
    let queued = engine
        .submit("sleep", json!({"millis": 10_000}))
        .await
        .unwrap();

    engine.shutdown(Duration::from_millis(30)).await;

    assert_eq!(
        engine.status(running).await.unwrap().state,
        JobState::Cancelled
    );
    assert_eq!(
        engine.status(queued).await.unwrap().state,
        JobState::Cancelled
    );
}
