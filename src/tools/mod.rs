//! Tool abstraction — the pluggable unit of work the engine executes.

pub mod registry;
pub mod tool;

pub use registry::{ToolDefinition, ToolRegistry};
pub use tool::{Tool, ToolError, require_str, validate_args};
