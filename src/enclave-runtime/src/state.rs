use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use enclave_common::ExecutionStats;
use enclave_sidecar::ReferenceSidecar;
use tokio::sync::Mutex;

use crate::tool_handler::ToolHandler;

/// Which budget a `__safe_*` helper most recently refused, if any. The host
/// side reads this back after catching a script exception to tell a real
/// limit violation apart from an ordinary thrown `Error` — QuickJS gives no
/// structured way to tag the exception value itself with this, so the
/// counters that already track the violation double as the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggeredLimit {
    Iteration,
    ToolCall,
    ConsoleCallCount,
    ConsoleOutputBytes,
    Concat,
    ToolCallInvalidArgs,
}

impl TriggeredLimit {
    fn to_u8(self) -> u8 {
        match self {
            TriggeredLimit::Iteration => 1,
            TriggeredLimit::ToolCall => 2,
            TriggeredLimit::ConsoleCallCount => 3,
            TriggeredLimit::ConsoleOutputBytes => 4,
            TriggeredLimit::Concat => 5,
            TriggeredLimit::ToolCallInvalidArgs => 6,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(TriggeredLimit::Iteration),
            2 => Some(TriggeredLimit::ToolCall),
            3 => Some(TriggeredLimit::ConsoleCallCount),
            4 => Some(TriggeredLimit::ConsoleOutputBytes),
            5 => Some(TriggeredLimit::Concat),
            6 => Some(TriggeredLimit::ToolCallInvalidArgs),
            _ => None,
        }
    }
}

/// Budgets enforced by the `__safe_*` helpers. Derived from the effective
/// [`enclave`] configuration for one execution.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RuntimeLimits {
    pub max_iterations: u64,
    pub max_tool_calls: u32,
    pub max_console_calls: u32,
    pub max_console_output_bytes: u64,
    pub max_concat_size: usize,
    /// When true, a script error's stack (if the engine reports one) is
    /// filtered to drop host-resident frames and capped before leaving
    /// the runtime. When false, the raw engine stack passes through
    /// unfiltered.
    pub sanitize_stack_traces: bool,
    pub max_sanitize_depth: usize,
    pub max_sanitize_properties: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            max_tool_calls: 50,
            max_console_calls: 200,
            max_console_output_bytes: 256 * 1024,
            max_concat_size: 1024 * 1024,
            sanitize_stack_traces: true,
            max_sanitize_depth: 8,
            max_sanitize_properties: 32,
        }
    }
}

/// Shared, cheaply-clonable state threaded through every `__safe_*`
/// closure for one execution. Counters are atomics so concurrent branches
/// spawned by `__safe_parallel` can update them without a lock.
pub struct RuntimeState {
    pub limits: RuntimeLimits,
    pub aborted: Arc<AtomicBool>,
    pub tool_handler: Arc<dyn ToolHandler>,
    pub sidecar: Option<Arc<Mutex<ReferenceSidecar>>>,
    tool_call_count: AtomicU32,
    iteration_count: AtomicU64,
    console_call_count: AtomicU32,
    console_byte_count: AtomicU64,
    triggered_limit: AtomicU8,
}

impl RuntimeState {
    pub fn new(
        limits: RuntimeLimits,
        tool_handler: Arc<dyn ToolHandler>,
        sidecar: Option<Arc<Mutex<ReferenceSidecar>>>,
    ) -> Self {
        Self {
            limits,
            aborted: Arc::new(AtomicBool::new(false)),
            tool_handler,
            sidecar,
            tool_call_count: AtomicU32::new(0),
            iteration_count: AtomicU64::new(0),
            console_call_count: AtomicU32::new(0),
            console_byte_count: AtomicU64::new(0),
            triggered_limit: AtomicU8::new(0),
        }
    }

    fn mark_triggered(&self, limit: TriggeredLimit) {
        self.triggered_limit.store(limit.to_u8(), Ordering::Relaxed);
    }

    /// The most recently tripped budget, if a `__safe_*` helper refused a
    /// call during this execution. Read by the host after catching a
    /// script exception to pick the right [`crate::error::RuntimeError`]
    /// variant instead of treating every exception as a generic script
    /// error.
    pub fn triggered_limit(&self) -> Option<TriggeredLimit> {
        TriggeredLimit::from_u8(self.triggered_limit.load(Ordering::Relaxed))
    }

    pub fn mark_tool_call_invalid_args(&self) {
        self.mark_triggered(TriggeredLimit::ToolCallInvalidArgs);
    }

    pub fn mark_concat_limit(&self) {
        self.mark_triggered(TriggeredLimit::Concat);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Relaxed);
    }

    /// Increments the tool-call counter, returning `false` once the new
    /// count exceeds the configured limit (the call that breaks the limit
    /// is counted, matching the documented "fires after the limit-breaking
    /// call is attempted" semantics).
    pub fn bump_tool_call(&self) -> bool {
        let n = self.tool_call_count.fetch_add(1, Ordering::Relaxed) + 1;
        let ok = n <= self.limits.max_tool_calls;
        if !ok {
            self.mark_triggered(TriggeredLimit::ToolCall);
        }
        ok
    }

    pub fn bump_iteration(&self) -> bool {
        let n = self.iteration_count.fetch_add(1, Ordering::Relaxed) + 1;
        let ok = n <= self.limits.max_iterations;
        if !ok {
            self.mark_triggered(TriggeredLimit::Iteration);
        }
        ok
    }

    pub fn bump_console(&self, bytes: u64) -> Result<(), &'static str> {
        let calls = self.console_call_count.fetch_add(1, Ordering::Relaxed) + 1;
        if calls > self.limits.max_console_calls {
            self.mark_triggered(TriggeredLimit::ConsoleCallCount);
            return Err("Console call limit exceeded");
        }
        let total = self.console_byte_count.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if total > self.limits.max_console_output_bytes {
            self.mark_triggered(TriggeredLimit::ConsoleOutputBytes);
            return Err("Console output limit exceeded");
        }
        Ok(())
    }

    pub fn snapshot(&self) -> (u32, u64, u32, u64) {
        (
            self.tool_call_count.load(Ordering::Relaxed),
            self.iteration_count.load(Ordering::Relaxed),
            self.console_call_count.load(Ordering::Relaxed),
            self.console_byte_count.load(Ordering::Relaxed),
        )
    }

    pub fn apply_to(&self, stats: &mut ExecutionStats) {
        let (tool_calls, iterations, console_calls, console_bytes) = self.snapshot();
        stats.tool_call_count = tool_calls;
        stats.iteration_count = iterations;
        stats.console_call_count = console_calls;
        stats.console_byte_count = console_bytes;
    }
}
