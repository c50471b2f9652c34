//! Job client for the remote generation service.
//!
//! The service only offers submit-and-poll: a submission returns a job id and
//! the result shows up after an unbounded delay, discoverable only by polling.
//! [`GenerationService`] is the transport seam; [`AceStepClient`] implements it
//! over HTTP. [`JobClient`] layers the polling policy on top and is what the
//! prefetch loop talks to.

mod ace_step;
pub mod decode;
mod error;
mod types;
mod wait;

pub use ace_step::AceStepClient;
pub use error::{FetchError, PollError, SubmitError};
pub use types::*;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Request/response operations offered by a generation backend.
///
/// Implementations hold no per-job state; every call is an independent
/// round trip.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit one generation request and return the job id assigned to it.
    async fn submit(&self, prompt: &str, duration_secs: u32) -> Result<JobId, SubmitError>;

    /// Query the current status of one job.
    async fn poll(&self, job_id: &JobId) -> Result<JobStatus, PollError>;

    /// Retrieve a remote output resource reported by a succeeded job.
    async fn fetch_output(&self, resource: &str) -> Result<Bytes, FetchError>;
}

/// A [`GenerationService`] paired with the policy used to wait on its jobs.
#[derive(Clone)]
pub struct JobClient {
    service: Arc<dyn GenerationService>,
    policy: WaitPolicy,
}

impl JobClient {
    pub fn new(service: Arc<dyn GenerationService>, policy: WaitPolicy) -> Self {
        Self { service, policy }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Submit a request for `duration_secs` of audio described by `prompt`.
    pub async fn submit(&self, prompt: &str, duration_secs: u32) -> Result<JobId, SubmitError> {
        if prompt.trim().is_empty() {
            return Err(SubmitError::InvalidRequest("prompt is empty".into()));
        }
        if duration_secs == 0 {
            return Err(SubmitError::InvalidRequest(
                "duration must be positive".into(),
            ));
        }
        self.service.submit(prompt, duration_secs).await
    }

    pub async fn poll(&self, job_id: &JobId) -> Result<JobStatus, PollError> {
        self.service.poll(job_id).await
    }

    /// Poll `job_id` until it reaches a terminal status or the policy gives up.
    pub async fn await_completion(&self, job_id: &JobId) -> JobOutcome {
        wait::await_completion(self.service.as_ref(), job_id, &self.policy).await
    }

    /// Obtain the audio bytes a succeeded job points at.
    pub async fn fetch(&self, locator: &OutputLocator) -> Result<Bytes, FetchError> {
        match locator {
            OutputLocator::Inline(audio) => Ok(audio.clone()),
            OutputLocator::Remote(resource) => self.service.fetch_output(resource).await,
        }
    }
}
