//! The `SandboxAdapter` capability interface and its two implementations:
//! an in-process VM adapter over `enclave-runtime`, and a process-pool
//! adapter over `enclave-worker`. The facade holds one behind
//! `Box<dyn SandboxAdapter>`, chosen once at construction by
//! [`crate::config::AdapterKind`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use enclave_common::EnclaveError;
use enclave_runtime::{RuntimeLimits, RuntimeState, ToolHandler};
use enclave_sidecar::ReferenceSidecar;
use enclave_worker::WorkerPool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

/// Raised when an [`crate::config::EnclaveConfig`] selects an adapter that
/// needs configuration the caller never supplied.
#[derive(Debug, Error)]
pub enum AdapterKindError {
    #[error("adapter is WorkerPool but no worker_pool config was set")]
    MissingWorkerPoolConfig,
}

impl From<AdapterKindError> for EnclaveError {
    fn from(err: AdapterKindError) -> Self {
        EnclaveError::new(enclave_common::ErrorCode::EnclaveError, err.to_string())
    }
}

/// Per-execution environment handed to an adapter's `execute`. Built fresh
/// by the facade for every `run()` call; never reused across calls.
pub struct ExecutionContext {
    pub tool_handler: Arc<dyn ToolHandler>,
    pub sidecar: Option<Arc<Mutex<ReferenceSidecar>>>,
    pub limits: RuntimeLimits,
    pub timeout: Duration,
    pub globals: serde_json::Map<String, serde_json::Value>,
}

/// What an adapter reports back to the facade: the evaluation's
/// success/failure and the counters the facade folds into `ExecutionStats`.
pub struct AdapterOutcome {
    pub result: Result<serde_json::Value, EnclaveError>,
    pub iteration_count: u64,
    pub tool_call_count: u32,
    pub console_call_count: u32,
    pub console_byte_count: u64,
}

/// Executes already-transformed AgentScript with a constrained binding set.
/// The two implementations differ only in where the evaluation happens;
/// both enforce the same wall-clock timeout ceiling and report the same
/// outcome shape.
#[async_trait]
pub trait SandboxAdapter: Send + Sync {
    async fn execute(&self, code: &str, ctx: ExecutionContext) -> AdapterOutcome;
}

/// In-process adapter: builds a fresh pruned QuickJS context per call via
/// `enclave_runtime::execute`. Single-threaded; the timeout is
/// authoritative only at suspension points (`await`, loop-iteration
/// checks), not mid-synchronous-statement.
#[derive(Debug, Default)]
pub struct VmAdapter;

#[async_trait]
impl SandboxAdapter for VmAdapter {
    #[instrument(skip_all, level = "debug")]
    async fn execute(&self, code: &str, ctx: ExecutionContext) -> AdapterOutcome {
        let state = Arc::new(RuntimeState::new(ctx.limits, ctx.tool_handler, ctx.sidecar));
        let result = enclave_runtime::execute(code, Arc::clone(&state), ctx.globals, ctx.timeout)
            .await
            .map_err(EnclaveError::from);
        let (tool_call_count, iteration_count, console_call_count, console_byte_count) =
            state.snapshot();
        AdapterOutcome {
            result,
            iteration_count,
            tool_call_count,
            console_call_count,
            console_byte_count,
        }
    }
}

/// Out-of-process adapter: checks a worker out of an `enclave-worker` pool
/// for the duration of one execution. The per-execution sidecar is not
/// bridged across the process boundary in this implementation — see
/// `DESIGN.md` — so `ExecutionContext::sidecar` is ignored here.
pub struct WorkerPoolAdapter {
    pool: WorkerPool,
}

impl WorkerPoolAdapter {
    pub fn new(config: enclave_worker::WorkerPoolConfig) -> Self {
        Self {
            pool: WorkerPool::new(config),
        }
    }
}

#[async_trait]
impl SandboxAdapter for WorkerPoolAdapter {
    #[instrument(skip_all, level = "debug")]
    async fn execute(&self, code: &str, ctx: ExecutionContext) -> AdapterOutcome {
        match self
            .pool
            .execute(code, ctx.limits, ctx.globals, ctx.timeout, ctx.tool_handler)
            .await
        {
            Ok(worker_result) => AdapterOutcome {
                result: if worker_result.success {
                    Ok(worker_result.value.unwrap_or(serde_json::Value::Null))
                } else {
                    Err(worker_result.error.unwrap_or_else(|| {
                        EnclaveError::new(
                            enclave_common::ErrorCode::EnclaveError,
                            "worker reported failure without an error payload",
                        )
                    }))
                },
                iteration_count: worker_result.iteration_count,
                tool_call_count: worker_result.tool_call_count as u32,
                console_call_count: worker_result.console_call_count as u32,
                console_byte_count: worker_result.console_byte_count,
            },
            Err(err) => AdapterOutcome {
                result: Err(EnclaveError::from(err)),
                iteration_count: 0,
                tool_call_count: 0,
                console_call_count: 0,
                console_byte_count: 0,
            },
        }
    }
}
