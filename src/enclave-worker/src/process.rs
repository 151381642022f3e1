//! A single spawned `enclave-runtime-worker` child process and the stdio
//! framing used to talk to it.

use std::path::Path;
use std::process::Stdio;

use enclave_runtime::worker_protocol::{HostMessage, WorkerMessage, WorkerRequest, encode_line};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::WorkerError;

/// A live child process plus its piped stdio, tracking how many executions
/// it has served so the pool can recycle it per [`crate::WorkerPoolConfig`].
pub struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    pub executions: u32,
}

impl WorkerProcess {
    pub async fn spawn(binary_path: &Path, max_executions: u32) -> Result<Self, WorkerError> {
        let mut child = Command::new(binary_path)
            .arg("--max-executions")
            .arg(max_executions.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Protocol("worker stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Protocol("worker stdout was not piped".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            executions: 0,
        })
    }

    pub async fn send_request(&mut self, request: &WorkerRequest) -> Result<(), WorkerError> {
        self.write_line(request).await
    }

    pub async fn reply(&mut self, message: &HostMessage) -> Result<(), WorkerError> {
        self.write_line(message).await
    }

    async fn write_line<T: serde::Serialize>(&mut self, value: &T) -> Result<(), WorkerError> {
        let line = encode_line(value).map_err(|e| WorkerError::Protocol(e.to_string()))?;
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(WorkerError::Io)?;
        self.stdin.flush().await.map_err(WorkerError::Io)
    }

    /// Reads the next `tool_call`/`done` line. An empty read (the child
    /// closed stdout) is reported as [`WorkerError::Crashed`].
    pub async fn recv(&mut self) -> Result<WorkerMessage, WorkerError> {
        let mut line = String::new();
        let bytes = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(WorkerError::Io)?;
        if bytes == 0 {
            return Err(WorkerError::Crashed);
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| WorkerError::Protocol(format!("{e} (raw: {line:?})")))
    }

    /// Forcibly terminates the process; used when it hangs past its
    /// deadline or a protocol error leaves it in an unknown state.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    /// `false` once the child has exited, observed without blocking.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}
