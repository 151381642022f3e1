/// Global identifiers that are always rejected when referenced free
/// (not declared locally) in validated source.
pub const FORBIDDEN_GLOBALS: &[&str] = &[
    "eval",
    "Function",
    "require",
    "import",
    "process",
    "global",
    "globalThis",
    "module",
    "exports",
    "__dirname",
    "__filename",
    "Buffer",
    "Reflect",
    "Proxy",
    "WeakRef",
    "FinalizationRegistry",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "performance",
];

/// Identifiers that are allowed to be referenced free, because the runtime
/// installs them as builtins or because they name the two entry points
/// (`callTool`, `parallel`) executed code may call directly.
pub const ALLOWED_BUILTINS: &[&str] = &[
    "callTool",
    "parallel",
    "Math",
    "JSON",
    "Array",
    "Object",
    "String",
    "Number",
    "Date",
    "console",
    "undefined",
    "NaN",
    "Infinity",
];

/// Identifier prefixes that user source may never declare, assign to, or
/// rebind. Reserved for the transformer's own synthesized bindings and the
/// safe runtime's host functions.
pub const RESERVED_PREFIXES: &[&str] = &["__ag_", "__safe_"];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| name.starts_with(p))
}
