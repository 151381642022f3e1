//! Out-of-process mechanics for the Worker Pool Adapter: a pool of
//! `enclave-runtime-worker` child processes, checkout/recycle lifecycle,
//! and the host side of the stdio protocol those processes speak.
//!
//! This crate owns process management only; the `SandboxAdapter` trait it
//! implements for lives in the `enclave` crate, which wraps [`WorkerPool`]
//! to avoid a dependency cycle between the two.

mod error;
mod process;
mod pool;

pub use enclave_runtime::worker_protocol::WorkerResult;
pub use error::WorkerError;
pub use pool::{WorkerPool, WorkerPoolConfig, test_binary_path};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use enclave_runtime::{RuntimeLimits, ToolCallError, ToolHandler};

    struct EchoToolHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoToolHandler {
        async fn call(
            &self,
            name: &str,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, ToolCallError> {
            Ok(serde_json::json!({"tool": name, "echo": args}))
        }
    }

    fn pool() -> WorkerPool {
        let Some(binary_path) = test_binary_path() else {
            panic!("CARGO_BIN_EXE_enclave-runtime-worker not set; run via `cargo test -p enclave-worker`");
        };
        WorkerPool::new(WorkerPoolConfig {
            binary_path,
            ..WorkerPoolConfig::default()
        })
    }

    #[tokio::test]
    #[ignore = "spawns the real enclave-runtime-worker binary; run explicitly with cargo test -- --ignored"]
    async fn executes_raw_source_through_a_real_worker() {
        let pool = pool();
        let result = pool
            .execute(
                "return 1 + 1;",
                RuntimeLimits::default(),
                serde_json::Map::new(),
                Duration::from_secs(5),
                Arc::new(EchoToolHandler),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.value, Some(serde_json::json!(2)));
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    #[ignore = "spawns the real enclave-runtime-worker binary; run explicitly with cargo test -- --ignored"]
    async fn tool_calls_bridge_back_to_the_host_handler() {
        let pool = pool();
        let result = pool
            .execute(
                "async function __ag_main() { return await __safe_callTool('search', {q: 'rust'}); } return __ag_main();",
                RuntimeLimits::default(),
                serde_json::Map::new(),
                Duration::from_secs(5),
                Arc::new(EchoToolHandler),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.tool_call_count, 1);
    }
}
