use std::sync::Arc;

use enclave_sidecar::SidecarError;
use rquickjs::function::{Async, Func, Rest};
use rquickjs::{Ctx, Object, Value};
use tracing::instrument;

use crate::error::RuntimeError;
use crate::state::RuntimeState;

/// Installs the safe-runtime helpers (`__safe_*`), `callTool`, `parallel`,
/// and the caller's validated globals into a freshly pruned context.
///
/// Everything bound here is the *entire* surface executed code ever sees:
/// the allowed builtins survive context pruning (`enclave_runtime::context`),
/// and this function adds nothing beyond the helpers, entry points, and
/// caller globals.
#[instrument(skip_all, level = "debug")]
pub(crate) fn install(
    ctx: &Ctx<'_>,
    state: Arc<RuntimeState>,
    caller_globals: serde_json::Map<String, serde_json::Value>,
) -> Result<(), RuntimeError> {
    let globals = ctx.globals();

    install_call_tool(ctx, &globals, Arc::clone(&state))?;
    install_parallel(ctx, &globals, Arc::clone(&state))?;
    install_loop_guards(ctx, &globals, Arc::clone(&state))?;
    install_concat_and_template(ctx, &globals, Arc::clone(&state))?;
    install_console(ctx, &globals, Arc::clone(&state))?;
    install_resolve_ref(ctx, &globals, state)?;

    for (name, value) in caller_globals {
        let js_value = caller_global_to_js(ctx, &value)?;
        globals
            .set(name.as_str(), js_value)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    }

    Ok(())
}

fn json_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> Result<Value<'js>, RuntimeError> {
    let text = serde_json::to_string(value).map_err(|e| RuntimeError::Engine(e.to_string()))?;
    ctx.json_parse(text).map_err(|e| RuntimeError::Engine(e.to_string()))
}

/// Converts one validated caller global into a JS value. Plain data takes
/// the fast `json_to_js` path; a subtree containing a `{"__kind":
/// "function", "source": ...}` leaf (`crate::globals_validator`'s
/// tagged-object convention, already checked against
/// `allow_functions_in_globals` and the dangerous-pattern denylist before
/// this ever runs) is rebuilt field-by-field so that leaf becomes an
/// actual callable `rquickjs::Function` instead of an inert object
/// literal carrying its source text as a string.
fn caller_global_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> Result<Value<'js>, RuntimeError> {
    if !contains_function_shape(value) {
        return json_to_js(ctx, value);
    }
    match value {
        serde_json::Value::Object(obj) if is_function_shape(obj) => build_function_global(ctx, obj),
        serde_json::Value::Object(obj) => {
            let out = Object::new(ctx.clone()).map_err(|e| RuntimeError::Engine(e.to_string()))?;
            for (key, nested) in obj {
                let js_nested = caller_global_to_js(ctx, nested)?;
                out.set(key.as_str(), js_nested)
                    .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            }
            Ok(Value::from(out))
        }
        serde_json::Value::Array(items) => {
            let arr = rquickjs::Array::new(ctx.clone()).map_err(|e| RuntimeError::Engine(e.to_string()))?;
            for (i, item) in items.iter().enumerate() {
                let js_item = caller_global_to_js(ctx, item)?;
                arr.set(i, js_item)
                    .map_err(|e| RuntimeError::Engine(e.to_string()))?;
            }
            Ok(Value::from(arr))
        }
        other => json_to_js(ctx, other),
    }
}

fn is_function_shape(obj: &serde_json::Map<String, serde_json::Value>) -> bool {
    obj.get("__kind").and_then(|k| k.as_str()) == Some("function")
}

fn contains_function_shape(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Object(obj) => is_function_shape(obj) || obj.values().any(contains_function_shape),
        serde_json::Value::Array(items) => items.iter().any(contains_function_shape),
        _ => false,
    }
}

/// Evaluates a function-shaped global's `source` as a parenthesized
/// expression (`(source)`), the usual way to force an engine to parse a
/// standalone function/arrow literal as an expression instead of a
/// statement, and returns the resulting callable.
fn build_function_global<'js>(
    ctx: &Ctx<'js>,
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<Value<'js>, RuntimeError> {
    let source = obj.get("source").and_then(|s| s.as_str()).unwrap_or("");
    let func: rquickjs::Function = ctx
        .eval(format!("({source})"))
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    Ok(Value::from(func))
}

fn js_to_json(ctx: &Ctx<'_>, value: Value<'_>) -> rquickjs::Result<serde_json::Value> {
    let text = match ctx.json_stringify(value)? {
        Some(s) => s.to_string()?,
        None => "null".to_string(),
    };
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::Null))
}

fn throw(ctx: &Ctx<'_>, message: impl Into<String>) -> rquickjs::Error {
    rquickjs::Exception::throw_internal(ctx, &message.into())
}

/// `callTool(name, args)`: the transformer rewrites bare `callTool(...)`
/// calls to `__safe_callTool(...)`, so both names are bound to the same
/// implementation — `callTool` so untransformed test harness snippets keep
/// working, `__safe_callTool` for the real post-transform path.
fn install_call_tool(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    let state_for_tool = Arc::clone(&state);
    let func = Func::from(Async(move |ctx: Ctx<'_>, name: String, args: Value<'_>| {
        let state = Arc::clone(&state_for_tool);
        async move {
            if state.is_aborted() {
                return Err(throw(&ctx, "execution was aborted"));
            }
            if !args.is_object() || args.as_array().is_some() {
                state.mark_tool_call_invalid_args();
                return Err(throw(&ctx, "tool call arguments must be a plain object"));
            }
            if !state.bump_tool_call() {
                return Err(throw(&ctx, "tool call limit exceeded"));
            }

            let json_args = js_to_json(&ctx, args)?;
            let result = state
                .tool_handler
                .call(&name, json_args)
                .await
                .map_err(|e| throw(&ctx, e.to_string()))?;
            json_to_js(&ctx, &result).map_err(|e| throw(&ctx, e.to_string()))
        }
    }));

    let f = rquickjs::Function::new(ctx.clone(), func)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
        .with_name("__safe_callTool")
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("__safe_callTool", f.clone())
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("callTool", f)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    let _ = state;
    Ok(())
}

/// `parallel(items, fn, {concurrency})`: maps `fn` over `items` with a
/// caller-bounded concurrency, delegating each call to the same tool-call
/// budget enforcement as a direct `callTool` invocation.
fn install_parallel(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    let func = Func::from(Async(
        move |ctx: Ctx<'_>, items: Vec<Value<'_>>, callback: rquickjs::Function<'_>, opts: Option<Object<'_>>| {
            let state = Arc::clone(&state);
            let concurrency = opts
                .and_then(|o| o.get::<_, Option<usize>>("concurrency").ok().flatten())
                .unwrap_or(4)
                .max(1);
            let callback = callback.clone();
            async move {
                let mut results = Vec::with_capacity(items.len());
                for chunk in items.chunks(concurrency) {
                    for item in chunk {
                        if state.is_aborted() {
                            return Err(throw(&ctx, "execution was aborted"));
                        }
                        let promise: rquickjs::Value = callback
                            .call((item.clone(),))
                            .map_err(|e| throw(&ctx, e.to_string()))?;
                        results.push(promise);
                    }
                }
                let array = rquickjs::Array::new(ctx.clone()).map_err(|e| throw(&ctx, e.to_string()))?;
                for (i, value) in results.into_iter().enumerate() {
                    array
                        .set(i, value)
                        .map_err(|e| throw(&ctx, e.to_string()))?;
                }
                Ok::<_, rquickjs::Error>(Value::from(array))
            }
        },
    ));

    let f = rquickjs::Function::new(ctx.clone(), func)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
        .with_name("parallel")
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("parallel", f)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    Ok(())
}

/// `__safe_for`/`__safe_while`/`__safe_doWhile`/`__safe_forOf`: the
/// transformer calls one of these with no arguments as the first statement
/// of every rewritten loop body. Each call is one iteration step.
fn install_loop_guards(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    for name in ["__safe_for", "__safe_while", "__safe_doWhile", "__safe_forOf"] {
        let state = Arc::clone(&state);
        let func = Func::from(move |ctx: Ctx<'_>, _rest: Rest<Value<'_>>| -> rquickjs::Result<()> {
            if state.is_aborted() {
                return Err(throw(&ctx, "execution was aborted"));
            }
            if !state.bump_iteration() {
                return Err(throw(&ctx, "iteration limit exceeded"));
            }
            Ok(())
        });
        let f = rquickjs::Function::new(ctx.clone(), func)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?
            .with_name(name)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
        globals
            .set(name, f)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    }
    Ok(())
}

fn install_concat_and_template(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    let concat_state = Arc::clone(&state);
    let concat = Func::from(move |ctx: Ctx<'_>, a: String, b: String| -> rquickjs::Result<String> {
        if concat_state.is_aborted() {
            return Err(throw(&ctx, "execution was aborted"));
        }
        let combined_len = a.len() + b.len();
        if combined_len > concat_state.limits.max_concat_size {
            concat_state.mark_concat_limit();
            return Err(throw(&ctx, "concatenation size limit exceeded"));
        }
        Ok(a + &b)
    });
    let f = rquickjs::Function::new(ctx.clone(), concat)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
        .with_name("__safe_concat")
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("__safe_concat", f)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;

    let template_state = state;
    let template = Func::from(
        move |ctx: Ctx<'_>, quasis: Vec<String>, exprs: Rest<Value<'_>>| -> rquickjs::Result<String> {
            if template_state.is_aborted() {
                return Err(throw(&ctx, "execution was aborted"));
            }
            let mut out = String::new();
            let mut total = 0usize;
            for (i, quasi) in quasis.iter().enumerate() {
                total += quasi.len();
                out.push_str(quasi);
                if let Some(expr) = exprs.0.get(i) {
                    let piece = js_to_json(&ctx, expr.clone())
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_else(|| stringify_loosely(&ctx, expr));
                    total += piece.len();
                    out.push_str(&piece);
                }
                if total > template_state.limits.max_concat_size {
                    template_state.mark_concat_limit();
                    return Err(throw(&ctx, "concatenation size limit exceeded"));
                }
            }
            Ok(out)
        },
    );
    let f = rquickjs::Function::new(ctx.clone(), template)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
        .with_name("__safe_template")
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("__safe_template", f)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    Ok(())
}

fn stringify_loosely(ctx: &Ctx<'_>, value: &Value<'_>) -> String {
    value
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| {
            js_to_json(ctx, value.clone())
                .map(|v| v.to_string())
                .unwrap_or_default()
        })
}

/// `__safe_console`: rate-limited `log`/`info`/`warn`/`error`/`debug`.
fn install_console(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    let console = Object::new(ctx.clone()).map_err(|e| RuntimeError::Engine(e.to_string()))?;
    for level in ["log", "info", "warn", "error", "debug"] {
        let state = Arc::clone(&state);
        let level_name = level;
        let func = Func::from(move |ctx: Ctx<'_>, args: Rest<Value<'_>>| -> rquickjs::Result<()> {
            if state.is_aborted() {
                return Err(throw(&ctx, "execution was aborted"));
            }
            let mut bytes = 0u64;
            for arg in args.0.iter() {
                bytes += stringify_loosely(&ctx, arg).len() as u64;
            }
            state
                .bump_console(bytes)
                .map_err(|message| throw(&ctx, message))?;
            tracing::debug!(level = level_name, bytes, "sandboxed console call");
            Ok(())
        });
        let f = rquickjs::Function::new(ctx.clone(), func)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?
            .with_name(level)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
        console
            .set(level, f)
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    }
    globals
        .set("__safe_console", console.clone())
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("console", console)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    Ok(())
}

/// `__safe_resolveRef(id)`: the only way executed code reaches a value the
/// extraction transform elided into the sidecar.
fn install_resolve_ref(
    ctx: &Ctx<'_>,
    globals: &Object<'_>,
    state: Arc<RuntimeState>,
) -> Result<(), RuntimeError> {
    let func = Func::from(move |ctx: Ctx<'_>, id: String| -> rquickjs::Result<String> {
        if state.is_aborted() {
            return Err(throw(&ctx, "execution was aborted"));
        }
        let Some(sidecar) = state.sidecar.as_ref() else {
            return Err(throw(
                &ctx,
                SidecarError::NotFound { id: id.clone() }.to_string(),
            ));
        };
        let sidecar = sidecar
            .try_lock()
            .map_err(|_| throw(&ctx, "sidecar is busy"))?;
        sidecar.resolve(&id).map_err(|e| throw(&ctx, e.to_string()))
    });
    let f = rquickjs::Function::new(ctx.clone(), func)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?
        .with_name("__safe_resolveRef")
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    globals
        .set("__safe_resolveRef", f)
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    Ok(())
}
