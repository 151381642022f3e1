//! The Worker Pool Adapter's process pool: checkout, request/reply
//! round-tripping (including the tool-call bridge back to the host's real
//! [`ToolHandler`]), recycling, and timeout-triggered kill-and-replace.
//!
//! Grounded on `sprklai-mesoclaw`'s `SidecarService`/`stdio_json` pair: a
//! managed child process talked to over a line-oriented protocol, with the
//! same "never let a stuck process block the pool" discipline, adapted from
//! HTTP polling to the bidirectional stdio framing `enclave-runtime`'s
//! worker binary speaks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use enclave_runtime::worker_protocol::{HostMessage, WorkerMessage, WorkerRequest, WorkerResult};
use enclave_runtime::{RuntimeLimits, ToolHandler};
use tokio::sync::{Mutex, Semaphore};
use tracing::instrument;

use crate::error::WorkerError;
use crate::process::WorkerProcess;

/// Resolves to the `enclave-runtime-worker` binary built alongside this
/// crate's integration tests, via the `CARGO_BIN_EXE_<name>` environment
/// variable Cargo sets when a dependent crate's tests need to locate a
/// binary owned by one of its dependencies. Production deployments must set
/// [`WorkerPoolConfig::binary_path`] explicitly; this is a test-time
/// convenience only.
pub fn test_binary_path() -> Option<PathBuf> {
    option_env!("CARGO_BIN_EXE_enclave-runtime-worker").map(PathBuf::from)
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub binary_path: PathBuf,
    pub max_pool_size: usize,
    pub max_executions_per_worker: u32,
    pub spawn_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            binary_path: test_binary_path().unwrap_or_else(|| PathBuf::from("enclave-runtime-worker")),
            max_pool_size: 4,
            max_executions_per_worker: 64,
            spawn_timeout: Duration::from_secs(5),
        }
    }
}

/// Process pool for the Worker Pool Adapter. One pool is shared across all
/// executions the adapter serves; `execute` checks a worker out, runs one
/// request/reply exchange to completion, and either returns the worker to
/// the idle set or kills it.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    idle: Mutex<Vec<WorkerProcess>>,
    permits: Semaphore,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let permits = Semaphore::new(config.max_pool_size);
        Self {
            config,
            idle: Mutex::new(Vec::new()),
            permits,
        }
    }

    /// Runs one execution against a pooled worker, bridging `tool_call`
    /// messages to `tool_handler` and enforcing `timeout` as a wall-clock
    /// deadline on the whole request/reply exchange. A worker that errors,
    /// crashes, or times out is killed rather than recycled.
    #[instrument(skip_all, level = "debug")]
    pub async fn execute(
        &self,
        source: &str,
        limits: RuntimeLimits,
        globals: serde_json::Map<String, serde_json::Value>,
        timeout: Duration,
        tool_handler: Arc<dyn ToolHandler>,
    ) -> Result<WorkerResult, WorkerError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| WorkerError::PoolExhausted(self.config.max_pool_size))?;

        let mut worker = self.checkout().await?;
        let request = WorkerRequest {
            source: source.to_string(),
            globals,
            limits,
            timeout_ms: timeout.as_millis() as u64,
        };

        let outcome = tokio::time::timeout(
            timeout + self.config.spawn_timeout,
            self.run_exchange(&mut worker, &request, tool_handler),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => {
                worker.executions += 1;
                if result.success && worker.executions < self.config.max_executions_per_worker {
                    self.idle.lock().await.push(worker);
                } else {
                    worker.kill().await;
                }
                Ok(result)
            }
            Ok(Err(err)) => {
                worker.kill().await;
                Err(err)
            }
            Err(_) => {
                worker.kill().await;
                Err(WorkerError::Timeout)
            }
        }
    }

    async fn run_exchange(
        &self,
        worker: &mut WorkerProcess,
        request: &WorkerRequest,
        tool_handler: Arc<dyn ToolHandler>,
    ) -> Result<WorkerResult, WorkerError> {
        worker.send_request(request).await?;
        loop {
            match worker.recv().await? {
                WorkerMessage::ToolCall { id, name, args } => {
                    let reply = match tool_handler.call(&name, args).await {
                        Ok(value) => HostMessage::ok(id, value),
                        Err(e) => HostMessage::err(id, e.to_string()),
                    };
                    worker.reply(&reply).await?;
                }
                WorkerMessage::Done { result } => return Ok(result),
            }
        }
    }

    async fn checkout(&self) -> Result<WorkerProcess, WorkerError> {
        if let Some(worker) = self.idle.lock().await.pop() {
            return Ok(worker);
        }
        tokio::time::timeout(
            self.config.spawn_timeout,
            WorkerProcess::spawn(&self.config.binary_path, self.config.max_executions_per_worker),
        )
        .await
        .map_err(|_| WorkerError::Timeout)?
    }

    /// Number of workers currently idle (checked back in, ready for reuse).
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }
}
