//! `SecurityLevel` default bundles and the `EnclaveConfig` each call's
//! effective limits are merged into.

use std::time::Duration;

use enclave_sidecar::ReferenceConfig;
use enclave_worker::WorkerPoolConfig;

/// Named default bundle for execution and sanitization limits. Explicit
/// [`EnclaveOptions`] fields override a level's defaults field-by-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    Strict,
    #[default]
    Standard,
    Relaxed,
}

/// Which [`crate::adapter::SandboxAdapter`] implementation executes a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterKind {
    #[default]
    Vm,
    WorkerPool,
}

/// Effective, resolved configuration for one [`crate::Enclave`] instance.
/// Built by merging a [`SecurityLevel`]'s defaults with caller overrides in
/// [`EnclaveOptions`]; immutable once the enclave is constructed.
#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    pub security_level: SecurityLevel,
    pub timeout: Duration,
    pub max_iterations: u64,
    pub max_tool_calls: u32,
    /// Advisory only; the Rust adapters don't enforce a hard memory ceiling.
    pub memory_limit_bytes: Option<u64>,
    pub adapter: AdapterKind,
    pub sanitize_stack_traces: bool,
    pub max_sanitize_depth: usize,
    pub max_sanitize_properties: usize,
    pub allow_functions_in_globals: bool,
    pub max_console_output_bytes: u64,
    pub max_console_calls: u32,
    pub validate: bool,
    pub transform: bool,
    pub sidecar: Option<ReferenceConfig>,
    pub worker_pool: Option<WorkerPoolConfig>,
}

impl SecurityLevel {
    pub fn defaults(self) -> EnclaveConfig {
        match self {
            SecurityLevel::Strict => EnclaveConfig {
                security_level: self,
                timeout: Duration::from_secs(2),
                max_iterations: 2_000,
                max_tool_calls: 10,
                memory_limit_bytes: Some(32 * 1024 * 1024),
                adapter: AdapterKind::Vm,
                sanitize_stack_traces: true,
                max_sanitize_depth: 4,
                max_sanitize_properties: 16,
                allow_functions_in_globals: false,
                max_console_output_bytes: 32 * 1024,
                max_console_calls: 50,
                validate: true,
                transform: true,
                sidecar: None,
                worker_pool: None,
            },
            SecurityLevel::Standard => EnclaveConfig {
                security_level: self,
                timeout: Duration::from_secs(5),
                max_iterations: 10_000,
                max_tool_calls: 50,
                memory_limit_bytes: Some(128 * 1024 * 1024),
                adapter: AdapterKind::Vm,
                sanitize_stack_traces: true,
                max_sanitize_depth: 8,
                max_sanitize_properties: 32,
                allow_functions_in_globals: false,
                max_console_output_bytes: 256 * 1024,
                max_console_calls: 200,
                validate: true,
                transform: true,
                sidecar: None,
                worker_pool: None,
            },
            SecurityLevel::Relaxed => EnclaveConfig {
                security_level: self,
                timeout: Duration::from_secs(30),
                max_iterations: 200_000,
                max_tool_calls: 500,
                memory_limit_bytes: Some(512 * 1024 * 1024),
                adapter: AdapterKind::Vm,
                sanitize_stack_traces: false,
                max_sanitize_depth: 16,
                max_sanitize_properties: 64,
                allow_functions_in_globals: true,
                max_console_output_bytes: 4 * 1024 * 1024,
                max_console_calls: 2_000,
                validate: true,
                transform: true,
                sidecar: None,
                worker_pool: None,
            },
        }
    }
}

/// Caller-supplied overrides merged onto a [`SecurityLevel`]'s defaults.
/// Every field is `Option`/absent-by-default so only the fields the caller
/// actually sets diverge from the level's bundle.
#[derive(Debug, Clone, Default)]
pub struct EnclaveOptions {
    pub security_level: SecurityLevel,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<u64>,
    pub max_tool_calls: Option<u32>,
    pub memory_limit_bytes: Option<u64>,
    pub adapter: Option<AdapterKind>,
    pub sanitize_stack_traces: Option<bool>,
    pub max_sanitize_depth: Option<usize>,
    pub max_sanitize_properties: Option<usize>,
    pub allow_functions_in_globals: Option<bool>,
    pub max_console_output_bytes: Option<u64>,
    pub max_console_calls: Option<u32>,
    pub validate: Option<bool>,
    pub transform: Option<bool>,
    pub sidecar: Option<ReferenceConfig>,
    pub worker_pool: Option<WorkerPoolConfig>,
    /// Caller-supplied global bindings, validated by the Globals Validator
    /// before being handed to the adapter.
    pub globals: serde_json::Map<String, serde_json::Value>,
}

impl EnclaveOptions {
    pub fn resolve(self) -> EnclaveConfig {
        let mut config = self.security_level.defaults();
        if let Some(v) = self.timeout {
            config.timeout = v;
        }
        if let Some(v) = self.max_iterations {
            config.max_iterations = v;
        }
        if let Some(v) = self.max_tool_calls {
            config.max_tool_calls = v;
        }
        if self.memory_limit_bytes.is_some() {
            config.memory_limit_bytes = self.memory_limit_bytes;
        }
        if let Some(v) = self.adapter {
            config.adapter = v;
        }
        if let Some(v) = self.sanitize_stack_traces {
            config.sanitize_stack_traces = v;
        }
        if let Some(v) = self.max_sanitize_depth {
            config.max_sanitize_depth = v;
        }
        if let Some(v) = self.max_sanitize_properties {
            config.max_sanitize_properties = v;
        }
        if let Some(v) = self.allow_functions_in_globals {
            config.allow_functions_in_globals = v;
        }
        if let Some(v) = self.max_console_output_bytes {
            config.max_console_output_bytes = v;
        }
        if let Some(v) = self.max_console_calls {
            config.max_console_calls = v;
        }
        if let Some(v) = self.validate {
            config.validate = v;
        }
        if let Some(v) = self.transform {
            config.transform = v;
        }
        if self.sidecar.is_some() {
            config.sidecar = self.sidecar;
        }
        if self.worker_pool.is_some() {
            config.worker_pool = self.worker_pool;
        }
        config
    }
}

impl EnclaveConfig {
    pub fn runtime_limits(&self) -> enclave_runtime::RuntimeLimits {
        enclave_runtime::RuntimeLimits {
            max_iterations: self.max_iterations,
            max_tool_calls: self.max_tool_calls,
            max_console_calls: self.max_console_calls,
            max_console_output_bytes: self.max_console_output_bytes,
            max_concat_size: self
                .sidecar
                .as_ref()
                .map(|s| s.max_resolved_size / 4)
                .unwrap_or(1024 * 1024),
            sanitize_stack_traces: self.sanitize_stack_traces,
            max_sanitize_depth: self.max_sanitize_depth,
            max_sanitize_properties: self.max_sanitize_properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_is_tighter_than_relaxed() {
        let strict = SecurityLevel::Strict.defaults();
        let relaxed = SecurityLevel::Relaxed.defaults();
        assert!(strict.max_iterations < relaxed.max_iterations);
        assert!(strict.timeout < relaxed.timeout);
        assert!(strict.sanitize_stack_traces);
        assert!(relaxed.allow_functions_in_globals);
    }

    #[test]
    fn explicit_override_wins_over_level_default() {
        let options = EnclaveOptions {
            security_level: SecurityLevel::Strict,
            max_iterations: Some(999),
            ..Default::default()
        };
        let config = options.resolve();
        assert_eq!(config.max_iterations, 999);
        assert_eq!(config.max_tool_calls, SecurityLevel::Strict.defaults().max_tool_calls);
    }
}
