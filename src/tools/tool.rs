//! Tool trait and argument validation.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::job::JobFailure;
use crate::pool::Lane;

/// Errors raised inside a tool body.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution was cancelled")]
    Cancelled,
}

impl ToolError {
    /// Stable kind string captured into the job record.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "invalid_input",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Io(_) => "io",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }
}

impl From<&ToolError> for JobFailure {
    fn from(err: &ToolError) -> Self {
        JobFailure::new(err.kind(), err.to_string())
    }
}

/// A pluggable unit of work.
///
/// Tools are registered once at startup and invoked by the engine when a
/// matching submission arrives. Long-running implementations must check
/// `cancel` at safe points and bail out with [`ToolError::Cancelled`];
/// heavy-lane tools that ignore it are aborted after the configured grace
/// period.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name used for dispatch.
    fn name(&self) -> &str;

    /// Human-readable description for the adapter layer.
    fn description(&self) -> &str;

    /// Declared input shape, JSON-Schema style. Arguments failing this
    /// schema are rejected at submission and never reach the pool.
    fn input_schema(&self) -> serde_json::Value;

    /// Which lane executions of this tool are routed to.
    fn lane(&self) -> Lane {
        Lane::Light
    }

    /// Execute the tool with validated arguments.
    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Validate arguments against a tool's declared input schema.
///
/// Supports the subset the tools actually declare: an object root with
/// `properties` (each with a `type` and optional `enum`) and a `required`
/// list. A schema without constraints accepts anything.
pub fn validate_args(schema: &serde_json::Value, args: &serde_json::Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if schema.get("type").and_then(|t| t.as_str()) == Some("object") && !args.is_object() {
        return Err(format!("expected object arguments, got {}", type_name(args)));
    }
    let empty = serde_json::Map::new();
    let args_map = args.as_object().unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !args_map.contains_key(name) {
                return Err(format!("missing required field: {name}"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, prop) in properties {
            let Some(value) = args_map.get(name) else {
                continue;
            };

            if let Some(expected) = prop.get("type").and_then(|t| t.as_str())
                && !type_matches(expected, value)
            {
                return Err(format!(
                    "field {name}: expected {expected}, got {}",
                    type_name(value)
                ));
            }

            if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array())
                && !allowed.contains(value)
            {
                return Err(format!("field {name}: value not in allowed set"));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keyword: don't reject.
        _ => true,
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Extract a required string parameter from tool arguments.
pub fn require_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput {
            reason: format!("missing required string parameter: {key}"),
        })
}
