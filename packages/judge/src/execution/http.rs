//! HTTP/JSON client for the Execution Service.
//!
//! - `POST {base}/runs` with a [`RunRequest`] body returns `{"token": "..."}`
//! - `GET {base}/runs/{token}` returns `{"ready": bool, "result": RunResult?}`
//! - `DELETE {base}/runs/{token}` cancels a run (best effort)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ExecutionError, ExecutionService, RunHandle, RunRequest, RunResult};
use crate::config::ExecutionConfig;

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PollRunResponse {
    ready: bool,
    result: Option<RunResult>,
}

#[derive(Clone)]
pub struct HttpExecutionService {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpExecutionService {
    pub fn new(config: &ExecutionConfig) -> Result<Self, ExecutionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
        })
    }

    fn runs_url(&self) -> String {
        format!("{}/runs", self.base_url)
    }

    fn run_url(&self, handle: &RunHandle) -> String {
        format!("{}/runs/{}", self.base_url, handle.0)
    }
}

/// Map transport failures and server errors to `Unavailable`, anything else
/// unexpected to `InvalidResponse`.
async fn decode<T: DeserializeOwned>(
    response: Result<Response, reqwest::Error>,
) -> Result<T, ExecutionError> {
    let response = response.map_err(|e| ExecutionError::Unavailable(e.to_string()))?;
    let status = response.status();

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ExecutionError::Unavailable(format!(
            "execution service responded {status}"
        )));
    }
    if !status.is_success() {
        return Err(ExecutionError::InvalidResponse(format!(
            "execution service responded {status}"
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl ExecutionService for HttpExecutionService {
    async fn run(&self, request: &RunRequest) -> Result<RunHandle, ExecutionError> {
        let created: CreateRunResponse =
            decode(self.client.post(self.runs_url()).json(request).send().await).await?;
        debug!(token = %created.token, language = %request.language, "Run submitted");
        Ok(RunHandle(created.token))
    }

    async fn poll(&self, handle: &RunHandle) -> Result<Option<RunResult>, ExecutionError> {
        let polled: PollRunResponse =
            decode(self.client.get(self.run_url(handle)).send().await).await?;

        match (polled.ready, polled.result) {
            (false, _) => Ok(None),
            (true, Some(result)) => Ok(Some(result)),
            (true, None) => Err(ExecutionError::InvalidResponse(format!(
                "run {handle} reported ready without a result"
            ))),
        }
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), ExecutionError> {
        self.client
            .delete(self.run_url(handle))
            .send()
            .await
            .map_err(|e| ExecutionError::Unavailable(e.to_string()))?;
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
