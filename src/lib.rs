//! jobcore — in-memory asynchronous job-execution engine.
//!
//! Backs a code-analysis tool server: a caller submits a registered tool
//! plus JSON arguments, gets an opaque handle back immediately, and later
//! polls status, fetches the result, or requests cancellation. Guarantees
//! hold for the lifetime of one server process; there is no durability.

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod pool;
pub mod tools;

pub use config::EngineConfig;
pub use engine::{Engine, EngineStats, JobStatus};
pub use error::{EngineError, Result};
pub use job::{JobFailure, JobRecord, JobState};
pub use pool::Lane;
pub use tools::{Tool, ToolDefinition, ToolError, ToolRegistry};
