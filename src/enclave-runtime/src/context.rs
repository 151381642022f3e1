use rquickjs::{AsyncContext, AsyncRuntime, Ctx, Object};
use tracing::instrument;

use crate::error::RuntimeError;

/// The exact set of global names left reachable after pruning. Matches the
/// allowed-builtins list the validator also enforces at the AST level;
/// this is the engine-level half of the belt-and-suspenders design.
const ALLOWED_GLOBAL_NAMES: &[&str] = &[
    "Math", "JSON", "Array", "Object", "String", "Number", "Date", "undefined", "NaN", "Infinity",
];

/// Builds a fresh `AsyncContext` and prunes its global object down to
/// [`ALLOWED_GLOBAL_NAMES`] plus whatever the caller installs afterwards
/// (`__safe_*` helpers, `callTool`, `parallel`, caller globals).
///
/// QuickJS does not expose intrinsic-level granularity fine enough to
/// include `Object`/`Array` while excluding `eval`/`Function` (both come
/// bundled in the base-objects intrinsic), so enforcement happens by
/// construction (full context) followed by explicit removal rather than by
/// selective intrinsic registration. The AST validator is the primary
/// control; this pruning is defense in depth.
#[instrument(skip_all, level = "debug")]
pub async fn build_pruned_context(runtime: &AsyncRuntime) -> Result<AsyncContext, RuntimeError> {
    let ctx = AsyncContext::full(runtime)
        .await
        .map_err(|e| RuntimeError::Engine(e.to_string()))?;

    ctx.with(|ctx| prune_globals(&ctx)).await?;

    Ok(ctx)
}

fn prune_globals(ctx: &Ctx<'_>) -> Result<(), RuntimeError> {
    let globals: Object = ctx.globals();
    let to_remove: Vec<String> = globals
        .keys::<String>()
        .filter_map(|k| k.ok())
        .filter(|name| !ALLOWED_GLOBAL_NAMES.contains(&name.as_str()))
        .collect();

    for name in to_remove {
        globals
            .remove(name.as_str())
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;
    }

    Ok(())
}
