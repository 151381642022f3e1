//! The `Enclave` entry point: wires together AST transformation,
//! validation, the scoring gate, and the configured execution adapter into
//! the single `run()` call callers see.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use enclave_common::{ErrorCode, ExecutionResult, ExecutionStats};
use enclave_runtime::ToolHandler;
use enclave_scoring::ScoringGate;
use enclave_sidecar::ReferenceSidecar;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::adapter::{AdapterKindError, ExecutionContext, SandboxAdapter, VmAdapter, WorkerPoolAdapter};
use crate::config::{AdapterKind, EnclaveConfig, EnclaveOptions};
use crate::globals_validator::{self, ValidatedGlobals};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One configured sandbox. Construction validates caller-supplied globals
/// once; `run()` is the only per-call entry point and never panics.
pub struct Enclave {
    config: EnclaveConfig,
    adapter: Box<dyn SandboxAdapter>,
    tool_handler: Arc<dyn ToolHandler>,
    scoring_gate: Option<Arc<dyn ScoringGate>>,
    validated_globals: ValidatedGlobals,
}

impl Enclave {
    /// Resolves `options` against its `security_level`'s defaults and
    /// validates its globals. Fails only if a global binding is unsafe;
    /// nothing about a given script is inspected yet.
    pub fn new(
        options: EnclaveOptions,
        tool_handler: Arc<dyn ToolHandler>,
        scoring_gate: Option<Arc<dyn ScoringGate>>,
    ) -> Result<Self, enclave_common::EnclaveError> {
        let globals = options.globals.clone();
        let config = options.resolve();

        let validated_globals = globals_validator::validate_globals(
            &globals,
            config.allow_functions_in_globals,
            config.max_sanitize_depth,
        )?;

        let adapter: Box<dyn SandboxAdapter> = match config.adapter {
            AdapterKind::Vm => Box::new(VmAdapter),
            AdapterKind::WorkerPool => {
                let pool_config = config.worker_pool.clone().ok_or(AdapterKindError::MissingWorkerPoolConfig)?;
                Box::new(WorkerPoolAdapter::new(pool_config))
            }
        };

        Ok(Self {
            config,
            adapter,
            tool_handler,
            scoring_gate,
            validated_globals,
        })
    }

    pub fn config(&self) -> &EnclaveConfig {
        &self.config
    }

    /// Runs `source` through transform (if enabled), validation (if
    /// enabled), scoring (if a gate is configured), and the chosen adapter.
    /// Every exit path disposes the sidecar, attaches a scoring result if
    /// one was computed, and finishes `stats` before returning.
    #[instrument(skip_all, level = "info")]
    pub async fn run(&self, source: &str) -> ExecutionResult {
        let mut metrics_guard = crate::metrics::ExecutionMetricsGuard::new();
        let mut stats = ExecutionStats::started_at(now_millis());
        let mut sidecar = self.config.sidecar.map(ReferenceSidecar::new);
        let mut scoring_result = None;

        let outcome = self.run_inner(source, &mut sidecar, &mut scoring_result, &mut stats).await;

        if let Some(sc) = sidecar.as_mut() {
            sc.dispose();
        }
        stats.finish(now_millis());
        metrics_guard.mark_outcome(outcome.is_ok());

        let mut result = match outcome {
            Ok(value) => ExecutionResult::success(value, stats),
            Err(error) => ExecutionResult::failure(error, stats),
        };
        result.scoring_result = scoring_result;
        result
    }

    async fn run_inner(
        &self,
        source: &str,
        sidecar: &mut Option<ReferenceSidecar>,
        scoring_result: &mut Option<enclave_common::ScoringResult>,
        stats: &mut ExecutionStats,
    ) -> Result<serde_json::Value, enclave_common::EnclaveError> {
        let mut extraction_error = None;

        let transformed = if self.config.transform {
            let extraction_threshold = self.config.sidecar.map(|s| s.extraction_threshold);
            let transform_outcome = match sidecar.as_mut() {
                Some(sc) => {
                    let mut store = |value: &str| match sc.store(value, "transform") {
                        Ok(id) => id.to_string(),
                        Err(err) => {
                            extraction_error = Some(err);
                            String::new()
                        }
                    };
                    enclave_ast::transform(
                        source,
                        enclave_ast::TransformOptions {
                            extraction_threshold,
                            store: Some(&mut store),
                        },
                    )
                }
                None => enclave_ast::transform(source, enclave_ast::TransformOptions::default()),
            };
            transform_outcome
                .map_err(|err| enclave_common::EnclaveError::new(ErrorCode::ValidationError, err.to_string()))?
        } else {
            source.to_string()
        };

        if let Some(err) = extraction_error {
            return Err(enclave_common::EnclaveError::from(err));
        }

        if self.config.validate {
            let extra_allowed: Vec<String> = self.validated_globals.keys().cloned().collect();
            let outcome = enclave_ast::validate(&transformed, &extra_allowed);
            if !outcome.is_valid() {
                return Err(enclave_common::EnclaveError::new(
                    ErrorCode::ValidationError,
                    format!("script rejected by validator ({} issue(s))", outcome.issues.len()),
                )
                .with_data(serde_json::to_value(&outcome.issues).unwrap_or(serde_json::Value::Null)));
            }
        }

        if let Some(gate) = &self.scoring_gate {
            let verdict = gate.evaluate(&transformed).await;
            let allowed = verdict.allowed;
            *scoring_result = Some(verdict.clone());
            if !allowed {
                return Err(enclave_common::EnclaveError::new(
                    ErrorCode::ScoringBlocked,
                    format!("scoring gate `{}` denied execution", gate.name()),
                )
                .with_data(serde_json::to_value(&verdict).unwrap_or(serde_json::Value::Null)));
            }
        }

        let sidecar_handle = sidecar.take().map(|sc| Arc::new(Mutex::new(sc)));
        let ctx = ExecutionContext {
            tool_handler: Arc::clone(&self.tool_handler),
            sidecar: sidecar_handle.clone(),
            limits: self.config.runtime_limits(),
            timeout: self.config.timeout,
            globals: self.validated_globals.clone(),
        };

        let outcome = self.adapter.execute(&transformed, ctx).await;
        stats.tool_call_count = outcome.tool_call_count;
        stats.iteration_count = outcome.iteration_count;
        stats.console_call_count = outcome.console_call_count;
        stats.console_byte_count = outcome.console_byte_count;

        if let Some(handle) = sidecar_handle {
            if let Ok(reclaimed) = Arc::try_unwrap(handle) {
                *sidecar = Some(reclaimed.into_inner());
            }
        }

        outcome.result
    }
}

/// Builds the default-configured [`Enclave`]: `Standard` security level,
/// a rejecting tool handler, and no scoring gate.
impl Default for Enclave {
    fn default() -> Self {
        Enclave::new(
            EnclaveOptions::default(),
            Arc::new(enclave_runtime::RejectingToolHandler),
            None,
        )
        .expect("default options always validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_dynamic_code_before_execution() {
        let enclave = Enclave::default();
        let result = enclave.run("return eval('1+1');").await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn scoring_gate_blocks_before_execution() {
        let enclave = Enclave::new(
            EnclaveOptions::default(),
            Arc::new(enclave_runtime::RejectingToolHandler),
            Some(enclave_scoring::shared(enclave_scoring::DenyAllScoringGate {
                risk_level: enclave_common::RiskLevel::Critical,
            })),
        )
        .unwrap();
        let result = enclave.run("return 1 + 1;").await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::ScoringBlocked);
        assert!(result.scoring_result.is_some());
    }

    #[tokio::test]
    async fn simple_expression_executes_successfully() {
        let enclave = Enclave::default();
        let result = enclave.run("return 1 + 1;").await;
        assert!(result.success);
        assert_eq!(result.value, Some(serde_json::json!(2)));
    }
}
