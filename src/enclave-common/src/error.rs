use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of error codes a caller may observe from a failed
/// execution. Every failure path in the workspace maps onto exactly one of
/// these; new failure modes get a new variant rather than reusing one with
/// a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    ScoringBlocked,
    ExecutionError,
    EnclaveError,
    Timeout,
    IterationLimit,
    ToolLimit,
    ConsoleLimit,
    ToolCallInvalidArgs,
    ReferenceNotFound,
    ReferenceSizeExceeded,
    ReferenceDepthExceeded,
    ConcatLimit,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ScoringBlocked => "SCORING_BLOCKED",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::EnclaveError => "ENCLAVE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::IterationLimit => "ITERATION_LIMIT",
            Self::ToolLimit => "TOOL_LIMIT",
            Self::ConsoleLimit => "CONSOLE_LIMIT",
            Self::ToolCallInvalidArgs => "TOOL_CALL_INVALID_ARGS",
            Self::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            Self::ReferenceSizeExceeded => "REFERENCE_SIZE_EXCEEDED",
            Self::ReferenceDepthExceeded => "REFERENCE_DEPTH_EXCEEDED",
            Self::ConcatLimit => "CONCAT_LIMIT",
        };
        f.write_str(s)
    }
}

/// The error shape surfaced to callers in a failed [`crate::ExecutionResult`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct EnclaveError {
    pub code: ErrorCode,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl EnclaveError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            name: code.to_string(),
            message,
            stack: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
