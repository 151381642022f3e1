use enclave_common::{EnclaveError, ErrorCode};
use thiserror::Error;

/// Failures that can surface from one `execute` call inside the runtime.
/// These map 1:1 onto [`enclave_common::ErrorCode`] via [`Into`].
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("script raised an exception: {name}: {message}")]
    Script {
        name: String,
        message: String,
        stack: Option<String>,
    },
    #[error("iteration limit exceeded")]
    IterationLimit,
    #[error("tool call limit exceeded")]
    ToolLimit,
    #[error("console call limit exceeded")]
    ConsoleLimit { reason: &'static str },
    #[error("concatenation limit exceeded")]
    ConcatLimit,
    #[error("tool call arguments must be a plain object")]
    ToolCallInvalidArgs,
    #[error("reference error: {0}")]
    Reference(#[from] enclave_sidecar::SidecarError),
    #[error("execution was aborted")]
    Aborted,
    #[error("engine error: {0}")]
    Engine(String),
}

impl From<RuntimeError> for EnclaveError {
    fn from(err: RuntimeError) -> Self {
        if let RuntimeError::Reference(inner) = &err {
            return EnclaveError::from(inner.clone());
        }

        let code = match &err {
            RuntimeError::Script { .. } => ErrorCode::ExecutionError,
            RuntimeError::IterationLimit => ErrorCode::IterationLimit,
            RuntimeError::ToolLimit => ErrorCode::ToolLimit,
            RuntimeError::ConsoleLimit { .. } => ErrorCode::ConsoleLimit,
            RuntimeError::ConcatLimit => ErrorCode::ConcatLimit,
            RuntimeError::ToolCallInvalidArgs => ErrorCode::ToolCallInvalidArgs,
            RuntimeError::Aborted => ErrorCode::Timeout,
            RuntimeError::Engine(_) => ErrorCode::EnclaveError,
            RuntimeError::Reference(_) => unreachable!("handled above"),
        };

        let message = err.to_string();
        match err {
            RuntimeError::Script { name, stack, .. } => {
                let mut e = EnclaveError::new(code, message).with_name(name);
                if let Some(stack) = stack {
                    e = e.with_stack(stack);
                }
                e
            }
            _ => EnclaveError::new(code, message),
        }
    }
}
