//! End-to-end scenarios run through the public `Enclave` facade, covering
//! the documented limit-enforcement, globals, and prototype-safety
//! behaviors.

use std::sync::Arc;

use async_trait::async_trait;
use enclave::{Enclave, EnclaveOptions, ErrorCode, ToolCallError, ToolHandler};

struct OkToolHandler;

#[async_trait]
impl ToolHandler for OkToolHandler {
    async fn call(&self, _name: &str, _args: serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
        Ok(serde_json::json!({"ok": true}))
    }
}

struct ReturningToolHandler(serde_json::Value);

#[async_trait]
impl ToolHandler for ReturningToolHandler {
    async fn call(&self, _name: &str, _args: serde_json::Value) -> Result<serde_json::Value, ToolCallError> {
        Ok(self.0.clone())
    }
}

fn enclave_with(tool_handler: Arc<dyn ToolHandler>, options: EnclaveOptions) -> Enclave {
    Enclave::new(options, tool_handler, None).expect("options resolve to a valid enclave")
}

#[tokio::test]
async fn eval_is_rejected_by_validation() {
    let enclave = Enclave::default();
    let result = enclave.run("return eval('1+1')").await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ValidationError);
    let issues = error.data.unwrap();
    let rendered = issues.to_string();
    assert!(rendered.contains("eval") || rendered.contains("GlobalNotAllowed"));
}

#[tokio::test]
async fn iteration_limit_trips_before_completion() {
    let enclave = enclave_with(
        Arc::new(enclave::RejectingToolHandler),
        EnclaveOptions {
            max_iterations: Some(100),
            ..Default::default()
        },
    );
    let result = enclave.run("for (let i=0;i<200;i++){};return 'ok'").await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::IterationLimit);
    assert!(error.message.to_lowercase().contains("iteration limit"));
}

#[tokio::test]
async fn tool_call_limit_fires_on_the_breaking_call() {
    let enclave = enclave_with(
        Arc::new(OkToolHandler),
        EnclaveOptions {
            max_tool_calls: Some(5),
            ..Default::default()
        },
    );
    let result = enclave
        .run("const a=[];for (let i=0;i<10;i++){await callTool('t',{i})};return 'done'")
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ToolLimit);
    assert!(error.message.to_lowercase().contains("tool call limit"));
    assert_eq!(result.stats.tool_call_count, 6);
}

#[tokio::test]
async fn concat_limit_fires_with_its_own_code() {
    let enclave = enclave_with(
        Arc::new(enclave::RejectingToolHandler),
        EnclaveOptions {
            max_iterations: Some(10_000),
            ..Default::default()
        },
    );
    let result = enclave
        .run("let s=''; for (let i=0;i<64;i++){ s = s + 'x'.repeat(64*1024); }; return s.length")
        .await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ConcatLimit);
}

#[tokio::test]
async fn tool_call_with_non_object_args_fails_with_invalid_args_code() {
    let enclave = enclave_with(Arc::new(OkToolHandler), EnclaveOptions::default());
    let result = enclave.run("return await callTool('t', 'not-an-object')").await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.code, ErrorCode::ToolCallInvalidArgs);
}

#[tokio::test]
async fn globals_round_trip() {
    let enclave = enclave_with(
        Arc::new(enclave::RejectingToolHandler),
        EnclaveOptions {
            globals: serde_json::Map::from_iter([("shared".to_string(), serde_json::json!("enclave1"))]),
            ..Default::default()
        },
    );
    let result = enclave.run("const s=shared; return s").await;

    assert!(result.success);
    assert_eq!(result.value, Some(serde_json::json!("enclave1")));
}

#[tokio::test]
async fn function_global_is_callable() {
    let enclave = enclave_with(
        Arc::new(enclave::RejectingToolHandler),
        EnclaveOptions {
            allow_functions_in_globals: Some(true),
            globals: serde_json::Map::from_iter([(
                "double".to_string(),
                serde_json::json!({"__kind": "function", "source": "(x) => x * 2"}),
            )]),
            ..Default::default()
        },
    );
    let result = enclave.run("return double(21)").await;

    assert!(result.success);
    assert_eq!(result.value, Some(serde_json::json!(42)));
}

#[tokio::test]
async fn prototype_pollution_is_contained() {
    let enclave = Enclave::default();
    let result = enclave.run("Object.prototype.polluted='pwned'; return 'done'").await;

    if result.success {
        assert_eq!(result.value, Some(serde_json::json!("done")));
    } else {
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationError);
    }

    // A fresh sandbox never observes pollution from a prior execution:
    // each call gets its own context, so there is nothing further to
    // assert about host-side state here.
}

#[tokio::test]
async fn constructor_string_concat_never_yields_function_constructor() {
    let enclave = Enclave::default();
    let result = enclave.run("const k='con'+'structor'; return Array[k]").await;

    if result.success {
        assert!(result.value.as_ref().map(|v| v.is_null()).unwrap_or(true));
    } else {
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationError);
    }
}

#[tokio::test]
async fn tool_call_round_trip_returns_handler_value() {
    let enclave = enclave_with(Arc::new(ReturningToolHandler(serde_json::json!(42))), EnclaveOptions::default());
    let result = enclave.run("return await callTool('x', {a:1})").await;

    assert!(result.success);
    assert_eq!(result.value, Some(serde_json::json!(42)));
    assert_eq!(result.stats.tool_call_count, 1);
}

#[tokio::test]
async fn raw_evaluation_without_transform_or_validate() {
    let enclave = enclave_with(
        Arc::new(enclave::RejectingToolHandler),
        EnclaveOptions {
            transform: Some(false),
            validate: Some(false),
            ..Default::default()
        },
    );
    let result = enclave.run("return 1+1").await;

    assert!(result.success);
    assert_eq!(result.value, Some(serde_json::json!(2)));
}
