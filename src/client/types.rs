use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Opaque handle the remote service assigns to a submitted generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the realized audio of a succeeded job can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLocator {
    /// A path on the remote service, fetched with a follow-up request.
    Remote(String),
    /// Audio bytes embedded directly in the poll response.
    Inline(Bytes),
}

/// Payload of a succeeded job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    /// `None` when the service reported success without a usable output reference.
    pub locator: Option<OutputLocator>,
    /// The decoded result object, kept for diagnostics.
    pub raw: serde_json::Value,
}

/// Normalized status of one job, independent of the wire shape it arrived in.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(JobOutput),
    Failed(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

/// Which bound ended an [`await_completion`](super::JobClient::await_completion) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitLimit {
    /// The overall wait deadline elapsed while the job was still pending.
    Deadline(Duration),
    /// Consecutive poll errors exceeded the retry budget.
    PollErrors(u32),
}

impl fmt::Display for WaitLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitLimit::Deadline(timeout) => {
                write!(f, "job did not finish within {}s", timeout.as_secs_f64())
            }
            WaitLimit::PollErrors(count) => {
                write!(f, "{} consecutive poll errors", count)
            }
        }
    }
}

/// Terminal result of waiting for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobOutput),
    Failed(String),
    TimedOut(WaitLimit),
}

/// Polling policy applied by [`JobClient::await_completion`](super::JobClient::await_completion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Fixed sleep between two polls of the same job.
    pub poll_interval: Duration,
    /// Upper bound on the whole wait.
    pub timeout: Duration,
    /// Consecutive poll errors tolerated before giving up.
    pub max_poll_retries: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            timeout: Duration::from_secs(300),
            max_poll_retries: 2,
        }
    }
}
