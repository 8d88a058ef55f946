//! Error types for the job engine.

use uuid::Uuid;

/// Errors surfaced by engine operations.
///
/// The variant names (and the strings returned by [`EngineError::kind`]) are
/// the stable failure contract the protocol adapter serializes; renaming one
/// is a breaking change for callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArgument { tool: String, reason: String },

    #[error("Unknown handle: {handle}")]
    UnknownHandle { handle: Uuid },

    #[error("Job {handle} is not ready (state: {state})")]
    NotReady { handle: Uuid, state: String },

    #[error("Job {handle} was cancelled")]
    WasCancelled { handle: Uuid },

    #[error("Tool failed ({kind}): {message}")]
    ToolFailure { kind: String, message: String },

    #[error("Lane {lane} queue is full ({depth} jobs queued)")]
    Saturated { lane: String, depth: usize },

    #[error("Engine is shutting down, not accepting submissions")]
    ShuttingDown,
}

impl EngineError {
    /// Stable failure-kind string for the adapter layer.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "UnknownTool",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::UnknownHandle { .. } => "UnknownHandle",
            Self::NotReady { .. } => "NotReady",
            Self::WasCancelled { .. } => "WasCancelled",
            Self::ToolFailure { .. } => "ToolFailure",
            Self::Saturated { .. } => "Saturated",
            Self::ShuttingDown => "ShuttingDown",
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = EngineError::UnknownTool {
            name: "missing".to_string(),
        };
        assert_eq!(err.kind(), "UnknownTool");

        let err = EngineError::NotReady {
            handle: Uuid::new_v4(),
            state: "running".to_string(),
        };
        assert_eq!(err.kind(), "NotReady");

        assert_eq!(EngineError::ShuttingDown.kind(), "ShuttingDown");
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::InvalidArgument {
            tool: "analyze".to_string(),
            reason: "missing required field: files".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("analyze"));
        assert!(msg.contains("files"));
    }
}
