//! Error types for the tether protocol.

use thiserror::Error;

/// Errors surfaced by kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid run id: {0}")]
    InvalidRunId(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("tool '{tool_name}' failed: {message}")]
    ToolFailed { tool_name: String, message: String },
    #[error("model provider error: {0}")]
    Provider(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl KernelError {
    /// True for the one engine error that is raised after the failure has
    /// already been recorded in the run log.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, Self::ToolFailed { .. })
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
