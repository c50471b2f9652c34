//! Error types for the job client.

/// Errors from submitting a generation request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The request was rejected locally before reaching the service.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The service could not be reached or answered with an HTTP error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered but no job id could be extracted.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors from polling a job. Always treated as soft by the waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors from retrieving a finished output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Shorten a response body for inclusion in an error message.
pub(crate) fn excerpt(body: &str) -> String {
    const LIMIT: usize = 200;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
