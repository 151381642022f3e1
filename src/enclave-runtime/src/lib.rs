//! Embedded QuickJS runtime for AgentScript.
//!
//! Builds a context pruned down to the closed allowed-builtins set
//! ([`context`]), installs the safe-runtime `__safe_*` helpers plus
//! `callTool`/`parallel` and the caller's validated globals ([`globals`]),
//! and evaluates the transformed entry point (`return __ag_main();`)
//! produced by `enclave-ast`.

pub mod context;
mod error;
mod globals;
mod state;
mod tool_handler;
pub mod worker_protocol;

pub use error::RuntimeError;
pub use state::{RuntimeLimits, RuntimeState, TriggeredLimit};
pub use tool_handler::{RejectingToolHandler, ToolCallError, ToolHandler};

use std::sync::Arc;
use std::time::Duration;

use rquickjs::{AsyncRuntime, CatchResultExt};
use tracing::instrument;

/// Evaluates already-transformed AgentScript `source` against a fresh
/// pruned context seeded with `state`'s tool handler/sidecar/limits and
/// `caller_globals`.
///
/// Races the evaluation against `timeout`: on expiry `state.abort()` is
/// set and [`RuntimeError::Aborted`] is returned. The caller (the
/// `enclave` facade's VM adapter, or this crate's worker binary) is
/// responsible for turning the returned value or error, plus
/// `state.apply_to`, into an `ExecutionResult`.
#[instrument(skip_all, level = "debug")]
pub async fn execute(
    source: &str,
    state: Arc<RuntimeState>,
    caller_globals: serde_json::Map<String, serde_json::Value>,
    timeout: Duration,
) -> Result<serde_json::Value, RuntimeError> {
    let runtime = AsyncRuntime::new().map_err(|e| RuntimeError::Engine(e.to_string()))?;
    let ctx = context::build_pruned_context(&runtime).await?;

    let idle_runtime = runtime.clone();
    let idle_handle = tokio::spawn(async move {
        idle_runtime.idle().await;
    });

    let install_state = Arc::clone(&state);
    let globals_result = ctx
        .with(|ctx| globals::install(&ctx, install_state, caller_globals))
        .await;
    globals_result?;

    let declaration = strip_entry_call(&ensure_entry_wrapped(source));
    let eval_state = Arc::clone(&state);
    let eval = async move {
        ctx.with(|ctx| -> Result<serde_json::Value, RuntimeError> {
            // `enclave_ast::transform` wraps source as
            // `async function __ag_main() { <body> } return __ag_main();`.
            // A bare top-level `return` is illegal in QuickJS's script
            // (Program) evaluation goal, so the host declares the function
            // by evaluating everything up to that trailing statement, then
            // retrieves and calls `__ag_main` directly — the call-then-await
            // is semantically identical to the literal `return` the
            // transform writes, just performed from the host side instead
            // of from inside the evaluated program.
            ctx.eval::<(), _>(declaration.clone())
                .catch(&ctx)
                .map_err(|e| classify_script_error(&eval_state, e))?;
            let entry: rquickjs::Function = ctx
                .globals()
                .get(ENTRY_MARKER)
                .catch(&ctx)
                .map_err(|e| classify_script_error(&eval_state, e))?;
            let promise: rquickjs::Promise = entry
                .call(())
                .catch(&ctx)
                .map_err(|e| classify_script_error(&eval_state, e))?;
            let value: rquickjs::Value = promise.finish().catch(&ctx).map_err(|e| {
                if eval_state.is_aborted() {
                    RuntimeError::Aborted
                } else {
                    classify_script_error(&eval_state, e)
                }
            })?;
            json_from_js(&ctx, value)
        })
        .await
    };

    let result = tokio::select! {
        result = eval => result,
        _ = tokio::time::sleep(timeout) => {
            state.abort();
            Err(RuntimeError::Aborted)
        }
    };

    idle_handle.abort();
    result
}

const ENTRY_MARKER: &str = "__ag_main";

/// Wraps `source` in the same entry shape `enclave_ast::transform` produces,
/// unless it is already wrapped. Lets the runtime evaluate raw, untransformed
/// source directly — used by test harnesses exercising `transform=false`.
fn ensure_entry_wrapped(source: &str) -> String {
    if source.contains(ENTRY_MARKER) {
        source.to_string()
    } else {
        format!("async function {ENTRY_MARKER}() {{\n{source}\n}}\nreturn {ENTRY_MARKER}();\n")
    }
}

/// Strips the trailing `return __ag_main();` statement `enclave_ast::transform`
/// appends, leaving only the function declaration (legal at Program scope).
/// A no-op if the marker is absent, e.g. raw source evaluated in tests with
/// `transform = false`.
fn strip_entry_call(source: &str) -> String {
    let marker_call = format!("return {ENTRY_MARKER}();");
    if let Some(idx) = source.rfind(&marker_call) {
        source[..idx].to_string()
    } else {
        source.to_string()
    }
}

/// Turns a caught QuickJS exception into the right [`RuntimeError`]: a
/// `__safe_*` limit violation is reported by the matching dedicated
/// variant (and its distinct `ErrorCode`) rather than the catch-all
/// `Script` case, which `RuntimeState::triggered_limit` tells apart from
/// an ordinary thrown `Error` since rquickjs gives the host no structured
/// way to tag the exception value itself.
fn classify_script_error(state: &RuntimeState, err: rquickjs::CaughtError<'_>) -> RuntimeError {
    match state.triggered_limit() {
        Some(TriggeredLimit::Iteration) => RuntimeError::IterationLimit,
        Some(TriggeredLimit::ToolCall) => RuntimeError::ToolLimit,
        Some(TriggeredLimit::ConsoleCallCount) => RuntimeError::ConsoleLimit {
            reason: "Console call limit exceeded",
        },
        Some(TriggeredLimit::ConsoleOutputBytes) => RuntimeError::ConsoleLimit {
            reason: "Console output limit exceeded",
        },
        Some(TriggeredLimit::Concat) => RuntimeError::ConcatLimit,
        Some(TriggeredLimit::ToolCallInvalidArgs) => RuntimeError::ToolCallInvalidArgs,
        None => script_error(state, err),
    }
}

fn script_error(state: &RuntimeState, err: rquickjs::CaughtError<'_>) -> RuntimeError {
    let message = err.to_string();
    let raw_stack = match &err {
        rquickjs::CaughtError::Exception(exc) => exc.get::<_, Option<String>>("stack").ok().flatten(),
        _ => None,
    };
    RuntimeError::Script {
        name: "Error".to_string(),
        message,
        stack: sanitize_stack(&state.limits, raw_stack),
    }
}

/// Host stack frames a raw QuickJS stack never actually contains, kept
/// here only in case a future embedding surfaces native frame names in
/// the same string; today this mainly caps the size of a deeply nested
/// script's own frames.
const HOST_FRAME_MARKERS: &[&str] = &["enclave_runtime", "enclave-runtime", "<native code>"];

/// Applies `limits.sanitize_stack_traces` to a raw engine stack: drops any
/// frame line matching a host-resident marker, keeps at most
/// `max_sanitize_depth` frames, and caps the joined size at
/// `max_sanitize_depth * max_sanitize_properties` bytes. A no-op pass
/// through when sanitization is off.
fn sanitize_stack(limits: &RuntimeLimits, raw: Option<String>) -> Option<String> {
    let raw = raw?;
    if !limits.sanitize_stack_traces {
        return Some(raw);
    }
    let kept: Vec<&str> = raw
        .lines()
        .filter(|line| !HOST_FRAME_MARKERS.iter().any(|marker| line.contains(marker)))
        .take(limits.max_sanitize_depth)
        .collect();
    let mut joined = kept.join("\n");
    let cap = limits.max_sanitize_depth.saturating_mul(limits.max_sanitize_properties);
    if joined.len() > cap {
        let mut end = cap;
        while end > 0 && !joined.is_char_boundary(end) {
            end -= 1;
        }
        joined.truncate(end);
    }
    Some(joined)
}

fn json_from_js(
    ctx: &rquickjs::Ctx<'_>,
    value: rquickjs::Value<'_>,
) -> Result<serde_json::Value, RuntimeError> {
    let text = match ctx
        .json_stringify(value)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
    {
        Some(s) => s
            .to_string()
            .map_err(|e| RuntimeError::Engine(e.to_string()))?,
        None => "null".to_string(),
    };
    serde_json::from_str(&text).map_err(|e| RuntimeError::Engine(e.to_string()))
}
