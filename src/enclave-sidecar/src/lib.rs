//! Per-execution content-addressed store for large strings. Created fresh
//! for each [`enclave`] `run()` call and disposed on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use enclave_common::{EnclaveError, ErrorCode};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

/// Budgets governing one sidecar instance. Every field is a byte or count
/// cap; violating any of them is a rejection, never a silent truncation.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceConfig {
    pub max_total_size: usize,
    pub max_reference_size: usize,
    pub extraction_threshold: usize,
    pub max_resolved_size: usize,
    pub allow_composites: bool,
    pub max_reference_count: usize,
    pub max_resolution_depth: u32,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            max_total_size: 16 * 1024 * 1024,
            max_reference_size: 4 * 1024 * 1024,
            extraction_threshold: 4 * 1024,
            max_resolved_size: 8 * 1024 * 1024,
            allow_composites: false,
            max_reference_count: 256,
            max_resolution_depth: 4,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SidecarError {
    #[error("reference store is full: adding {added} bytes would exceed the {limit} byte total budget")]
    TotalSizeExceeded { added: usize, limit: usize },
    #[error("value of {size} bytes exceeds the per-reference limit of {limit} bytes")]
    ReferenceTooLarge { size: usize, limit: usize },
    #[error("reference count limit of {limit} reached")]
    CountExceeded { limit: usize },
    #[error("reference `{id}` not found")]
    NotFound { id: String },
    #[error("resolving `{id}` would exceed the {limit} byte resolved-size budget for this execution")]
    ResolvedSizeExceeded { id: String, limit: usize },
    #[error("resolving `{id}` exceeds the maximum resolution depth of {limit}")]
    DepthExceeded { id: String, limit: u32 },
    #[error("composite references are not allowed by this configuration")]
    CompositesNotAllowed,
}

impl From<SidecarError> for EnclaveError {
    fn from(err: SidecarError) -> Self {
        let code = match &err {
            SidecarError::NotFound { .. } => ErrorCode::ReferenceNotFound,
            SidecarError::ResolvedSizeExceeded { .. } | SidecarError::TotalSizeExceeded { .. } => {
                ErrorCode::ReferenceSizeExceeded
            }
            SidecarError::DepthExceeded { .. } => ErrorCode::ReferenceDepthExceeded,
            SidecarError::ReferenceTooLarge { .. }
            | SidecarError::CountExceeded { .. }
            | SidecarError::CompositesNotAllowed => ErrorCode::ReferenceSizeExceeded,
        };
        EnclaveError::new(code, err.to_string())
    }
}

/// An opaque, sidecar-scoped token returned from [`ReferenceSidecar::store`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    value: String,
    depth: u32,
}

/// Content-addressed, per-execution reference store. Not `Clone`: a fresh
/// instance is constructed for each execution by the facade and torn down
/// via [`ReferenceSidecar::dispose`] on every exit path, success or failure.
pub struct ReferenceSidecar {
    config: ReferenceConfig,
    entries: HashMap<String, Entry>,
    total_size: usize,
    resolved_this_execution: AtomicU64,
    disposed: bool,
    sequence: u64,
}

impl ReferenceSidecar {
    pub fn new(config: ReferenceConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            total_size: 0,
            resolved_this_execution: AtomicU64::new(0),
            disposed: false,
            sequence: 0,
        }
    }

    /// Stores `value`, returning a reference id resolvable via
    /// [`ReferenceSidecar::resolve`] for the lifetime of this sidecar.
    ///
    /// Always stores at depth 0: nothing upstream ever extracts a composite
    /// (object/array) value into the sidecar, only scalar string literals,
    /// so `store_with_depth`'s depth parameter and `allow_composites` have
    /// no caller that would exercise them yet. Composite storage — walking
    /// a structured value, storing each nested reference, propagating
    /// depth so `max_resolution_depth` actually bounds something — would
    /// need to be added here before `allow_composites: true` does anything.
    #[instrument(skip_all, level = "debug", fields(origin = origin))]
    pub fn store(&mut self, value: &str, origin: &str) -> Result<ReferenceId, SidecarError> {
        self.store_with_depth(value, 0)
    }

    fn store_with_depth(&mut self, value: &str, depth: u32) -> Result<ReferenceId, SidecarError> {
        if self.entries.len() >= self.config.max_reference_count {
            return Err(SidecarError::CountExceeded {
                limit: self.config.max_reference_count,
            });
        }
        if value.len() > self.config.max_reference_size {
            return Err(SidecarError::ReferenceTooLarge {
                size: value.len(),
                limit: self.config.max_reference_size,
            });
        }
        if self.total_size + value.len() > self.config.max_total_size {
            return Err(SidecarError::TotalSizeExceeded {
                added: value.len(),
                limit: self.config.max_total_size,
            });
        }

        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        hasher.update(self.sequence.to_le_bytes());
        let digest = hasher.finalize();
        let id = format!("ref:{}", hex::encode(&digest[..16]));

        self.total_size += value.len();
        self.entries.insert(
            id.clone(),
            Entry {
                value: value.to_string(),
                depth,
            },
        );
        Ok(ReferenceId(id))
    }

    /// Resolves `id` back to its stored value, enforcing the per-execution
    /// resolved-size budget and the resolution-depth cap.
    #[instrument(skip(self), level = "debug")]
    pub fn resolve(&self, id: &str) -> Result<String, SidecarError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| SidecarError::NotFound { id: id.to_string() })?;

        if entry.depth >= self.config.max_resolution_depth {
            return Err(SidecarError::DepthExceeded {
                id: id.to_string(),
                limit: self.config.max_resolution_depth,
            });
        }

        let already = self.resolved_this_execution.load(Ordering::Relaxed) as usize;
        if already + entry.value.len() > self.config.max_resolved_size {
            return Err(SidecarError::ResolvedSizeExceeded {
                id: id.to_string(),
                limit: self.config.max_resolved_size,
            });
        }
        self.resolved_this_execution
            .fetch_add(entry.value.len() as u64, Ordering::Relaxed);

        Ok(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clears all stored state. Idempotent; safe to call more than once,
    /// though the facade calls it exactly once per execution.
    pub fn dispose(&mut self) {
        self.entries.clear();
        self.total_size = 0;
        self.disposed = true;
    }
}

impl Drop for ReferenceSidecar {
    fn drop(&mut self) {
        if !self.disposed {
            tracing::debug!("ReferenceSidecar dropped without explicit dispose(); clearing now");
            self.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidecar() -> ReferenceSidecar {
        ReferenceSidecar::new(ReferenceConfig {
            max_total_size: 1024,
            max_reference_size: 512,
            extraction_threshold: 64,
            max_resolved_size: 1024,
            allow_composites: false,
            max_reference_count: 4,
            max_resolution_depth: 2,
        })
    }

    #[test]
    fn store_then_resolve_round_trips() {
        let mut sc = sidecar();
        let id = sc.store("hello world", "extraction").unwrap();
        assert_eq!(sc.resolve(id.as_str()).unwrap(), "hello world");
    }

    #[test]
    fn resolve_unknown_id_fails() {
        let sc = sidecar();
        assert!(matches!(
            sc.resolve("ref:does-not-exist"),
            Err(SidecarError::NotFound { .. })
        ));
    }

    #[test]
    fn oversized_reference_rejected() {
        let mut sc = sidecar();
        let big = "x".repeat(1024);
        assert!(matches!(
            sc.store(&big, "extraction"),
            Err(SidecarError::ReferenceTooLarge { .. })
        ));
    }

    #[test]
    fn reference_count_limit_enforced() {
        let mut sc = sidecar();
        for i in 0..4 {
            sc.store(&format!("v{i}"), "extraction").unwrap();
        }
        assert!(matches!(
            sc.store("v5", "extraction"),
            Err(SidecarError::CountExceeded { .. })
        ));
    }

    #[test]
    fn dispose_clears_entries() {
        let mut sc = sidecar();
        let id = sc.store("value", "extraction").unwrap();
        sc.dispose();
        assert!(sc.resolve(id.as_str()).is_err());
        assert!(sc.is_empty());
    }
}
