use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::decode::{decode_poll, decode_submit};
use super::error::{excerpt, FetchError, PollError, SubmitError};
use super::types::{JobId, JobStatus};
use super::GenerationService;
use crate::config::ApiConfig;

/// Body of a `release_task` request.
#[derive(Debug, Serialize)]
struct ReleaseTaskRequest<'a> {
    task_type: &'a str,
    text: &'a str,
    thinking: bool,
    lm_backend: &'a str,
    lm_model_path: &'a str,
    config_path: &'a str,
    audio_duration: u32,
}

/// Body of a `query_result` request.
#[derive(Debug, Serialize)]
struct QueryResultRequest<'a> {
    task_id_list: [&'a str; 1],
}

/// HTTP client for an ACE-Step style text-to-music API server.
pub struct AceStepClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    download_timeout: Duration,
    task_type: String,
    thinking: bool,
    lm_backend: String,
    lm_model_path: String,
    model_config: String,
}

impl AceStepClient {
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            task_type: config.task_type.clone(),
            thinking: config.thinking,
            lm_backend: config.lm_backend.clone(),
            lm_model_path: config.lm_model_path.clone(),
            model_config: config.model_config.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Query the service health endpoint and return its JSON body.
    pub async fn health(&self) -> anyhow::Result<Value> {
        use anyhow::Context;

        let response = self
            .client
            .get(self.url("/health"))
            .timeout(self.request_timeout)
            .send()
            .await
            .context("Failed to reach generation service")?;

        let response = error_for_status(response)
            .await
            .map_err(|e| anyhow::anyhow!("Health check failed: {}", e))?;

        response
            .json()
            .await
            .context("Health endpoint returned invalid JSON")
    }
}

/// Turn a non-success HTTP response into a transport error message.
async fn error_for_status(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(format!("HTTP {}: {}", status.as_u16(), excerpt(&body)))
}

#[async_trait]
impl GenerationService for AceStepClient {
    async fn submit(&self, prompt: &str, duration_secs: u32) -> Result<JobId, SubmitError> {
        let request = ReleaseTaskRequest {
            task_type: &self.task_type,
            text: prompt,
            thinking: self.thinking,
            lm_backend: &self.lm_backend,
            lm_model_path: &self.lm_model_path,
            config_path: &self.model_config,
            audio_duration: duration_secs,
        };

        info!(
            prompt = %prompt.chars().take(50).collect::<String>(),
            duration_secs,
            "Submitting generation task"
        );

        let response = self
            .client
            .post(self.url("/release_task"))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubmitError::Transport(e.to_string()))?;

        let response = error_for_status(response)
            .await
            .map_err(SubmitError::Transport)?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SubmitError::Protocol(format!("invalid JSON: {}", e)))?;

        let job_id = decode_submit(&body)?;
        info!(job_id = %job_id, "Generation task accepted");
        Ok(job_id)
    }

    async fn poll(&self, job_id: &JobId) -> Result<JobStatus, PollError> {
        let request = QueryResultRequest {
            task_id_list: [job_id.as_str()],
        };

        let response = self
            .client
            .post(self.url("/query_result"))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let response = error_for_status(response)
            .await
            .map_err(PollError::Transport)?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| PollError::Transport(format!("unreadable poll response: {}", e)))?;

        let status = decode_poll(&body, job_id);
        debug!(job_id = %job_id, terminal = status.is_terminal(), "Polled job");
        Ok(status)
    }

    async fn fetch_output(&self, resource: &str) -> Result<Bytes, FetchError> {
        let url = if resource.starts_with("http://") || resource.starts_with("https://") {
            resource.to_string()
        } else if resource.starts_with('/') {
            self.url(resource)
        } else {
            self.url(&format!("/{}", resource))
        };

        debug!(url = %url, "Downloading generated audio");

        let response = self
            .client
            .get(&url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let response = error_for_status(response)
            .await
            .map_err(FetchError::Transport)?;

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}
