//! Out-of-process worker spawned by the Worker Pool Adapter.
//!
//! Reads one newline-delimited [`WorkerRequest`] from stdin per execution,
//! runs it against [`enclave_runtime::execute`], and writes the interleaved
//! `tool_call`/`done` [`WorkerMessage`] stream to stdout. Tool calls are
//! bridged back to the pool over the same two pipes: a `StdioToolHandler`
//! writes a `tool_call` line and waits for the matching `tool_result` line
//! the pool writes back to this process's stdin.
//!
//! Exits cleanly after `--max-executions` requests (the pool's recycling
//! policy) or when the pool closes stdin.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Parser;
use dashmap::DashMap;
use enclave_common::EnclaveError;
use enclave_runtime::worker_protocol::{
    HostMessage, WorkerMessage, WorkerRequest, WorkerResult, encode_line,
};
use enclave_runtime::{RuntimeState, ToolCallError, ToolHandler};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, oneshot};
use tracing::instrument;

#[derive(clap::Parser)]
#[command(version, about)]
struct Cli {
    /// Exit after this many executions so the pool can recycle the process.
    #[arg(long, default_value_t = 64)]
    max_executions: u32,
}

/// Bridges `callTool` calls from inside the sandboxed script back across
/// the process boundary to the pool's own tool handler.
struct StdioToolHandler {
    stdout: Arc<Mutex<Stdout>>,
    pending: Arc<DashMap<String, oneshot::Sender<HostMessage>>>,
    next_id: AtomicU64,
}

#[async_trait]
impl ToolHandler for StdioToolHandler {
    async fn call(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, ToolCallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let message = WorkerMessage::ToolCall {
            id: id.clone(),
            name: name.to_string(),
            args,
        };
        if let Err(e) = write_line(&self.stdout, &message).await {
            self.pending.remove(&id);
            return Err(ToolCallError::Rejected(format!(
                "failed to dispatch tool call to pool: {e}"
            )));
        }

        match rx.await {
            Ok(HostMessage::ToolResult {
                value: Some(v), ..
            }) => Ok(v),
            Ok(HostMessage::ToolResult {
                error: Some(msg), ..
            }) => Err(ToolCallError::Rejected(msg)),
            Ok(HostMessage::ToolResult { .. }) => Ok(serde_json::Value::Null),
            Err(_) => Err(ToolCallError::Rejected(
                "pool closed before answering tool call".to_string(),
            )),
        }
    }
}

async fn write_line<T: serde::Serialize>(stdout: &Mutex<Stdout>, value: &T) -> Result<()> {
    let line = encode_line(value).context("encoding worker protocol message")?;
    let mut stdout = stdout.lock().await;
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let pending = Arc::new(DashMap::new());
    let mut stdin = BufReader::new(tokio::io::stdin());

    for execution in 0..cli.max_executions {
        let mut line = String::new();
        let bytes = stdin
            .read_line(&mut line)
            .await
            .context("reading worker request from stdin")?;
        if bytes == 0 {
            break; // pool closed stdin; exit cleanly
        }

        let request: WorkerRequest = match serde_json::from_str(line.trim_end()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "malformed worker request, skipping");
                continue;
            }
        };

        let result = run_one(request, Arc::clone(&stdout), Arc::clone(&pending), &mut stdin).await;
        write_line(&stdout, &WorkerMessage::Done { result }).await?;

        tracing::debug!(execution, "worker execution complete");
    }

    Ok(())
}

/// Runs a single execution, wiring up the tool-call bridge and the
/// interleaved stdin reads for `tool_result` replies it depends on.
#[instrument(skip_all, level = "debug")]
async fn run_one(
    request: WorkerRequest,
    stdout: Arc<Mutex<Stdout>>,
    pending: Arc<DashMap<String, oneshot::Sender<HostMessage>>>,
    stdin: &mut BufReader<tokio::io::Stdin>,
) -> WorkerResult {
    let tool_handler = Arc::new(StdioToolHandler {
        stdout,
        pending: Arc::clone(&pending),
        next_id: AtomicU64::new(0),
    });
    let state = Arc::new(RuntimeState::new(request.limits, tool_handler, None));
    let timeout = Duration::from_millis(request.timeout_ms);

    // Tool-result replies can arrive interleaved with nothing else while an
    // execution is in flight, so a background task drains stdin into the
    // pending map; `execute` and this task race on the same stdin handle is
    // avoided by only ever reading from it here, between executions.
    let reply_state = Arc::clone(&pending);
    let drain = async move {
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => break,
            }
            let Ok(msg) = serde_json::from_str::<HostMessage>(line.trim_end()) else {
                continue;
            };
            let HostMessage::ToolResult { ref id, .. } = msg;
            if let Some((_, tx)) = reply_state.remove(id) {
                let _ = tx.send(msg);
            }
        }
    };

    let execution = enclave_runtime::execute(
        &request.source,
        Arc::clone(&state),
        request.globals,
        timeout,
    );

    let outcome = tokio::select! {
        result = execution => result,
        _ = drain => Err(enclave_runtime::RuntimeError::Engine(
            "pool closed stdin mid-execution".to_string(),
        )),
    };

    let (tool_calls, iterations, console_calls, console_bytes) = state.snapshot();
    match outcome {
        Ok(value) => WorkerResult {
            success: true,
            value: Some(value),
            error: None,
            iteration_count: iterations,
            tool_call_count: tool_calls as u64,
            console_call_count: console_calls as u64,
            console_byte_count: console_bytes,
        },
        Err(err) => WorkerResult {
            success: false,
            value: None,
            error: Some(EnclaveError::from(err)),
            iteration_count: iterations,
            tool_call_count: tool_calls as u64,
            console_call_count: console_calls as u64,
            console_byte_count: console_bytes,
        },
    }
}
