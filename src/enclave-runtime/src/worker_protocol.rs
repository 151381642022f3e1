//! Newline-delimited JSON protocol spoken over a worker process's stdio.
//!
//! One [`WorkerRequest`] line is written to the child's stdin to start an
//! execution. The child then writes a stream of [`WorkerMessage`] lines to
//! its stdout: zero or more [`WorkerMessage::ToolCall`] messages, each of
//! which blocks the worker until the matching [`HostMessage::ToolResult`]
//! line arrives back on stdin, followed by exactly one
//! [`WorkerMessage::Done`] that ends the execution.
//!
//! ```text
//! host  → {"source":"...","globals":{},"limits":{...},"timeoutMs":5000}\n
//! child → {"type":"tool_call","id":"1","name":"search","args":{...}}\n
//! host  → {"type":"tool_result","id":"1","result":{"ok":true}}\n
//! child → {"type":"done","result":{"success":true,"value":42,"stats":{...}}}\n
//! ```
//!
//! Grounded on the host⇄sidecar stdio framing in `sprklai-mesoclaw`'s
//! `protocol::stdio_json` module; generalized here to a bidirectional
//! protocol since tool calls must cross back to the host mid-execution
//! rather than only at the start and end of a single request/response.

use enclave_common::EnclaveError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::RuntimeLimits;

/// The single message a host writes to start a worker execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub source: String,
    #[serde(default)]
    pub globals: serde_json::Map<String, Value>,
    pub limits: RuntimeLimits,
    pub timeout_ms: u64,
}

/// Messages a worker writes to its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Emitted for every `__safe_callTool` invocation; the worker blocks on
    /// the matching [`HostMessage::ToolResult`] before resuming.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    /// Emitted exactly once, terminating the execution.
    Done { result: WorkerResult },
}

/// Messages a host writes back to a worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    ToolResult {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage {
    pub fn ok(id: String, value: Value) -> Self {
        HostMessage::ToolResult {
            id,
            value: Some(value),
            error: None,
        }
    }

    pub fn err(id: String, message: String) -> Self {
        HostMessage::ToolResult {
            id,
            value: None,
            error: Some(message),
        }
    }
}

/// The outcome a worker reports in its terminal [`WorkerMessage::Done`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnclaveError>,
    pub iteration_count: u64,
    pub tool_call_count: u64,
    pub console_call_count: u64,
    pub console_byte_count: u64,
}

/// Serializes `value` as a single newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_round_trips() {
        let msg = WorkerMessage::ToolCall {
            id: "1".to_string(),
            name: "search".to_string(),
            args: serde_json::json!({"q": "rust"}),
        };
        let line = encode_line(&msg).unwrap();
        assert!(line.ends_with('\n'));
        let decoded: WorkerMessage = serde_json::from_str(line.trim_end()).unwrap();
        match decoded {
            WorkerMessage::ToolCall { id, name, .. } => {
                assert_eq!(id, "1");
                assert_eq!(name, "search");
            }
            _ => panic!("expected ToolCall"),
        }
    }

    #[test]
    fn done_message_decodes() {
        let raw = r#"{"type":"done","result":{"success":true,"value":42,"iteration_count":1,"tool_call_count":0,"console_call_count":0,"console_byte_count":0}}"#;
        let decoded: WorkerMessage = serde_json::from_str(raw).unwrap();
        match decoded {
            WorkerMessage::Done { result } => {
                assert!(result.success);
                assert_eq!(result.value, Some(serde_json::json!(42)));
            }
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn host_tool_result_ok_serializes_without_error_field() {
        let msg = HostMessage::ok("1".to_string(), serde_json::json!({"ok": true}));
        let line = encode_line(&msg).unwrap();
        assert!(!line.contains("\"error\""));
    }

    #[test]
    fn host_tool_result_err_serializes_without_value_field() {
        let msg = HostMessage::err("1".to_string(), "rejected".to_string());
        let line = encode_line(&msg).unwrap();
        assert!(!line.contains("\"value\""));
        assert!(line.contains("rejected"));
    }
}
