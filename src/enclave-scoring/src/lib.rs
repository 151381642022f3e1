//! The optional scoring gate: an async pre-execution veto over the
//! transformed source, plus the bounded, content-addressed cache the
//! facade keeps alive for the lifetime of one [`enclave`] instance.

use std::sync::Arc;

use dashmap::DashMap;
use enclave_common::{RiskLevel, ScoringResult};
use sha2::{Digest, Sha256};
use tracing::instrument;

/// Evaluates transformed source and returns a verdict before execution
/// proceeds. Implementations are treated as untrusted advisory logic: a
/// scorer that panics or times out should be wrapped by the caller to
/// degrade to [`ScoringResult::allow`] rather than blocking execution,
/// unless the deployment explicitly wants fail-closed scoring.
#[async_trait::async_trait]
pub trait ScoringGate: Send + Sync {
    async fn evaluate(&self, transformed_code: &str) -> ScoringResult;

    fn name(&self) -> &'static str {
        "scoring-gate"
    }
}

/// Default gate used when no caller-supplied scorer is configured: always
/// allows, with a single informational signal so callers can distinguish
/// "not scored" from "scored and allowed".
#[derive(Debug, Default)]
pub struct NullScoringGate;

#[async_trait::async_trait]
impl ScoringGate for NullScoringGate {
    async fn evaluate(&self, _transformed_code: &str) -> ScoringResult {
        ScoringResult::allow()
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

fn hash_source(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Wraps a [`ScoringGate`] with a bounded, immutable-after-insert cache
/// keyed by a hash of the transformed source. Entries never expire except
/// via [`CachingScoringGate::clear`], which the facade calls on `dispose`.
pub struct CachingScoringGate<G: ScoringGate> {
    inner: G,
    cache: DashMap<String, ScoringResult>,
    max_entries: usize,
}

impl<G: ScoringGate> CachingScoringGate<G> {
    pub fn new(inner: G, max_entries: usize) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
            max_entries,
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[instrument(skip_all, level = "debug")]
    pub async fn evaluate_cached(&self, transformed_code: &str) -> ScoringResult {
        let key = hash_source(transformed_code);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let result = self.inner.evaluate(transformed_code).await;

        if self.cache.len() < self.max_entries {
            self.cache.entry(key).or_insert_with(|| result.clone());
        } else {
            tracing::debug!(
                max_entries = self.max_entries,
                "scoring cache full, evaluating without caching"
            );
        }

        result
    }
}

#[async_trait::async_trait]
impl<G: ScoringGate> ScoringGate for CachingScoringGate<G> {
    async fn evaluate(&self, transformed_code: &str) -> ScoringResult {
        self.evaluate_cached(transformed_code).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// A gate that always denies, for tests exercising `SCORING_BLOCKED`.
#[derive(Debug)]
pub struct DenyAllScoringGate {
    pub risk_level: RiskLevel,
}

#[async_trait::async_trait]
impl ScoringGate for DenyAllScoringGate {
    async fn evaluate(&self, _transformed_code: &str) -> ScoringResult {
        ScoringResult {
            allowed: false,
            total_score: 1.0,
            risk_level: self.risk_level,
            signals: vec![enclave_common::ScoringSignal {
                id: "deny-all".to_string(),
                description: "test gate configured to deny everything".to_string(),
                weight: 1.0,
            }],
        }
    }
}

pub fn shared<G: ScoringGate + 'static>(gate: G) -> Arc<dyn ScoringGate> {
    Arc::new(gate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_gate_allows() {
        let gate = NullScoringGate;
        let result = gate.evaluate("return 1;").await;
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn caching_gate_reuses_verdict() {
        let gate = CachingScoringGate::new(NullScoringGate, 10);
        let a = gate.evaluate_cached("return 1;").await;
        let b = gate.evaluate_cached("return 1;").await;
        assert_eq!(a.allowed, b.allowed);
        assert_eq!(gate.len(), 1);
    }

    #[tokio::test]
    async fn deny_all_blocks() {
        let gate = DenyAllScoringGate {
            risk_level: RiskLevel::High,
        };
        let result = gate.evaluate("return 1;").await;
        assert!(!result.allowed);
    }
}
