//! Defense-in-depth sandbox for executing untrusted AgentScript.
//!
//! An [`Enclave`] wires four layers together behind one `run()` call:
//! AST validation and transformation (`enclave-ast`), an optional
//! content-addressed reference sidecar for large literals
//! (`enclave-sidecar`), an optional risk-scoring gate (`enclave-scoring`),
//! and one of two execution adapters — an in-process pruned QuickJS
//! context (`enclave-runtime`) or a pool of sandboxed worker processes
//! (`enclave-worker`).
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use enclave::{Enclave, EnclaveOptions};
//! # async fn example() {
//! let enclave = Enclave::new(
//!     EnclaveOptions::default(),
//!     Arc::new(enclave_runtime::RejectingToolHandler),
//!     None,
//! ).unwrap();
//! let result = enclave.run("return 1 + 1;").await;
//! assert!(result.success);
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod globals_validator;
mod facade;
mod metrics;

pub use adapter::{AdapterKindError, ExecutionContext, SandboxAdapter, VmAdapter, WorkerPoolAdapter};
pub use config::{AdapterKind, EnclaveConfig, EnclaveOptions, SecurityLevel};
pub use facade::Enclave;
pub use globals_validator::{GlobalsValidationError, ValidatedGlobals};

pub use enclave_common::{ErrorCode, EnclaveError, ExecutionResult, ExecutionStats};
pub use enclave_runtime::{RejectingToolHandler, ToolCallError, ToolHandler};
pub use enclave_scoring::{CachingScoringGate, DenyAllScoringGate, NullScoringGate, ScoringGate, shared};
pub use enclave_sidecar::ReferenceConfig;
pub use enclave_worker::WorkerPoolConfig;
