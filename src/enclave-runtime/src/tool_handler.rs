use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("{0}")]
    Rejected(String),
}

/// The caller-supplied bridge from `callTool(name, args)` to the outside
/// world. The Enclave never inspects what a handler does; it only enforces
/// that `args` is a plain object and that the call count stays within
/// budget before delegating.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, ToolCallError>;
}

/// A handler that rejects every call; useful as a safe default and in
/// tests that assert a program never actually reaches a tool.
pub struct RejectingToolHandler;

#[async_trait]
impl ToolHandler for RejectingToolHandler {
    async fn call(&self, name: &str, _args: serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
        Err(ToolCallError::Rejected(format!(
            "no tool handler configured; rejected call to `{name}`"
        )))
    }
}
