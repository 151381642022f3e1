use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(std::io::Error),
    #[error("worker I/O error: {0}")]
    Io(std::io::Error),
    #[error("worker protocol error: {0}")]
    Protocol(String),
    #[error("worker exceeded its deadline and was killed")]
    Timeout,
    #[error("worker process exited unexpectedly")]
    Crashed,
    #[error("pool is at capacity ({0} workers)")]
    PoolExhausted(usize),
}

impl From<WorkerError> for enclave_common::EnclaveError {
    fn from(err: WorkerError) -> Self {
        let code = match &err {
            WorkerError::Timeout => enclave_common::ErrorCode::Timeout,
            _ => enclave_common::ErrorCode::EnclaveError,
        };
        enclave_common::EnclaveError::new(code, err.to_string())
    }
}
