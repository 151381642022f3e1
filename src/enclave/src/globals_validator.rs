//! Inspects caller-provided global bindings for dangerous shapes before
//! they ever reach an adapter. Runs once, at [`crate::Enclave`]
//! construction time.

use thiserror::Error;
use tracing::instrument;

/// Function bindings whose source text or name contains one of these are
/// rejected even when `allow_functions_in_globals` is true — a caller
/// handing the sandbox a closure over `require`/`eval`/`process` would
/// otherwise reintroduce exactly what the AST validator's deny-list keeps
/// out of the script surface itself.
const DANGEROUS_PATTERNS: &[&str] = &[
    "require", "eval", "Function", "process", "Buffer", "child_process", "spawn", "exec",
];

#[derive(Debug, Error)]
pub enum GlobalsValidationError {
    #[error("global `{name}` is a function but allowFunctionsInGlobals is false")]
    FunctionsNotAllowed { name: String },
    #[error("global `{name}` is a function matching denylisted pattern `{pattern}`")]
    DangerousFunction { name: String, pattern: &'static str },
    #[error("global `{name}` is a getter/setter accessor, which is never allowed")]
    AccessorNotAllowed { name: String },
    #[error("global `{name}` nests deeper than the configured maxDepth of {max_depth}")]
    TooDeep { name: String, max_depth: usize },
}

impl From<GlobalsValidationError> for enclave_common::EnclaveError {
    fn from(err: GlobalsValidationError) -> Self {
        enclave_common::EnclaveError::new(enclave_common::ErrorCode::EnclaveError, err.to_string())
    }
}

/// A binding the validator has cleared for installation into an adapter's
/// environment. Plain data only — rquickjs function bindings are built
/// downstream in `enclave-runtime`, never here.
pub type ValidatedGlobals = serde_json::Map<String, serde_json::Value>;

/// Walks `globals` up to `max_depth`, rejecting accessor shapes always and
/// function-shaped leaves unless `allow_functions` permits them and they
/// don't match [`DANGEROUS_PATTERNS`].
///
/// Bindings arrive as `serde_json::Value`, which cannot itself represent a
/// function or an accessor — those only exist on the JS side. The validator
/// therefore inspects the string-tagged shapes a caller uses to describe
/// one: an object of the form `{"__kind": "function", "source": "..."}` or
/// `{"__kind": "accessor", ...}`. Every other value is a plain JSON binding
/// and passes through unchanged.
#[instrument(skip_all, level = "debug")]
pub fn validate_globals(
    globals: &serde_json::Map<String, serde_json::Value>,
    allow_functions: bool,
    max_depth: usize,
) -> Result<ValidatedGlobals, GlobalsValidationError> {
    let mut validated = serde_json::Map::new();
    for (name, value) in globals {
        walk(name, value, allow_functions, max_depth, 0)?;
        validated.insert(name.clone(), value.clone());
    }
    Ok(validated)
}

fn walk(
    name: &str,
    value: &serde_json::Value,
    allow_functions: bool,
    max_depth: usize,
    depth: usize,
) -> Result<(), GlobalsValidationError> {
    if depth > max_depth {
        return Err(GlobalsValidationError::TooDeep {
            name: name.to_string(),
            max_depth,
        });
    }

    let serde_json::Value::Object(obj) = value else {
        if let serde_json::Value::Array(items) = value {
            for item in items {
                walk(name, item, allow_functions, max_depth, depth + 1)?;
            }
        }
        return Ok(());
    };

    match obj.get("__kind").and_then(|k| k.as_str()) {
        Some("accessor") => Err(GlobalsValidationError::AccessorNotAllowed {
            name: name.to_string(),
        }),
        Some("function") => {
            if !allow_functions {
                return Err(GlobalsValidationError::FunctionsNotAllowed {
                    name: name.to_string(),
                });
            }
            let source = obj.get("source").and_then(|s| s.as_str()).unwrap_or("");
            if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| source.contains(**p) || name.contains(**p)) {
                return Err(GlobalsValidationError::DangerousFunction {
                    name: name.to_string(),
                    pattern,
                });
            }
            Ok(())
        }
        _ => {
            for (key, nested) in obj {
                walk(key, nested, allow_functions, max_depth, depth + 1)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_pass_through() {
        let globals = serde_json::Map::from_iter([("shared".to_string(), json!("enclave1"))]);
        let validated = validate_globals(&globals, false, 8).unwrap();
        assert_eq!(validated.get("shared"), Some(&json!("enclave1")));
    }

    #[test]
    fn function_rejected_when_not_allowed() {
        let globals = serde_json::Map::from_iter([(
            "f".to_string(),
            json!({"__kind": "function", "source": "() => 1"}),
        )]);
        assert!(matches!(
            validate_globals(&globals, false, 8),
            Err(GlobalsValidationError::FunctionsNotAllowed { .. })
        ));
    }

    #[test]
    fn dangerous_function_rejected_even_when_allowed() {
        let globals = serde_json::Map::from_iter([(
            "f".to_string(),
            json!({"__kind": "function", "source": "() => require('fs')"}),
        )]);
        assert!(matches!(
            validate_globals(&globals, true, 8),
            Err(GlobalsValidationError::DangerousFunction { .. })
        ));
    }

    #[test]
    fn accessor_always_rejected() {
        let globals = serde_json::Map::from_iter([(
            "g".to_string(),
            json!({"__kind": "accessor"}),
        )]);
        assert!(matches!(
            validate_globals(&globals, true, 8),
            Err(GlobalsValidationError::AccessorNotAllowed { .. })
        ));
    }

    #[test]
    fn nesting_past_max_depth_rejected() {
        let globals = serde_json::Map::from_iter([(
            "deep".to_string(),
            json!({"a": {"b": {"c": 1}}}),
        )]);
        assert!(matches!(
            validate_globals(&globals, false, 1),
            Err(GlobalsValidationError::TooDeep { .. })
        ));
    }

    #[test]
    fn safe_function_allowed_when_permitted() {
        let globals = serde_json::Map::from_iter([(
            "f".to_string(),
            json!({"__kind": "function", "source": "() => 42"}),
        )]);
        assert!(validate_globals(&globals, true, 8).is_ok());
    }
}
