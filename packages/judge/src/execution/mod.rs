//! Execution Client - adapter to the external Execution Service.
//!
//! One call per test case. The client never judges correctness: a program
//! crash or non-zero exit is a normal [`RunResult`]. Errors are reserved for
//! transport or backend failures.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use http::HttpExecutionService;

/// A single program execution against one stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: String,
    pub source_code: String,
    pub stdin: String,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
}

/// Opaque token identifying a run inside the Execution Service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle(pub String);

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw outcome reported by the Execution Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub compile_output: Option<String>,
    /// Set by the service when the source did not compile.
    #[serde(default)]
    pub compile_failed: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Signal that terminated the program, if any.
    #[serde(default)]
    pub exit_signal: Option<i32>,
    /// Elapsed time in milliseconds.
    #[serde(default)]
    pub time_ms: u64,
    /// Peak memory in kilobytes.
    #[serde(default)]
    pub memory_kb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Execution service unavailable: {0}")]
    Unavailable(String),

    #[error("Execution service returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Run did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Run cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Whether the same run may be attempted again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Contract of the external Execution Service.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Submit a run; returns as soon as the service accepted it.
    async fn run(&self, request: &RunRequest) -> Result<RunHandle, ExecutionError>;

    /// Non-blocking check; `None` while the run is still executing.
    async fn poll(&self, handle: &RunHandle) -> Result<Option<RunResult>, ExecutionError>;

    /// Best-effort cancellation of an in-flight run.
    async fn cancel(&self, _handle: &RunHandle) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// Block until the run is ready or `cancel` fires.
    async fn await_result(
        &self,
        handle: &RunHandle,
        cancel: &CancellationToken,
    ) -> Result<RunResult, ExecutionError> {
        loop {
            if let Some(result) = self.poll(handle).await? {
                return Ok(result);
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.cancel(handle).await;
                    return Err(ExecutionError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval()) => {}
            }
        }
    }
}

/// Submit and await a single run, bounded by `timeout` as a whole.
///
/// The timeout guards against a hung service independently of the sandbox's
/// own limit enforcement.
pub async fn run_to_completion(
    service: &dyn ExecutionService,
    request: &RunRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<RunResult, ExecutionError> {
    let deadline = Instant::now() + timeout;

    let handle = tokio::select! {
        _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
        submitted = tokio::time::timeout_at(deadline, service.run(request)) => {
            submitted.map_err(|_| ExecutionError::Timeout(timeout))??
        }
    };

    match tokio::time::timeout_at(deadline, service.await_result(&handle, cancel)).await {
        Ok(result) => result,
        Err(_) => {
            let _ = service.cancel(&handle).await;
            Err(ExecutionError::Timeout(timeout))
        }
    }
}
