//! Shared types passed across the enclave crate boundaries: execution
//! results, stats, error codes, AST issues, and scoring results.
//!
//! Kept deliberately small and dependency-light, matching the role this
//! crate's ancestor played for the host/guest split it used to sit between.

use std::fmt;

use serde::{Deserialize, Serialize};

mod error;
mod issue;
mod scoring;
mod stats;

pub use error::{EnclaveError, ErrorCode};
pub use issue::{AstIssue, IssueCode, Severity, SourceLocation};
pub use scoring::{RiskLevel, ScoringResult, ScoringSignal};
pub use stats::ExecutionStats;

/// The outcome of a single `run()` call.
///
/// Mirrors the tagged success/failure shape callers receive: `value` is
/// populated only on success, `error` only on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnclaveError>,
    pub stats: ExecutionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scoring_result: Option<ScoringResult>,
}

impl ExecutionResult {
    pub fn success(value: serde_json::Value, stats: ExecutionStats) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
            stats,
            scoring_result: None,
        }
    }

    pub fn failure(error: EnclaveError, stats: ExecutionStats) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error),
            stats,
            scoring_result: None,
        }
    }

    pub fn with_scoring_result(mut self, result: Option<ScoringResult>) -> Self {
        self.scoring_result = result;
        self
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(f, "ExecutionResult(success)")
        } else {
            let code = self
                .error
                .as_ref()
                .map(|e| e.code)
                .unwrap_or(ErrorCode::EnclaveError);
            write!(f, "ExecutionResult(failure: {code})")
        }
    }
}
