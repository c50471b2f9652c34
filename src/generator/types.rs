use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::{FetchError, SubmitError, WaitLimit};

/// Tuning for the prefetch loop.
#[derive(Debug, Clone)]
pub struct PrefetchSettings {
    /// Text prompt sent with every generation request.
    pub prompt: String,
    /// Requested length of each segment, in seconds.
    pub segment_duration_secs: u32,
    /// Desired number of ready segments buffered ahead of the consumer.
    pub prefetch_target: usize,
    /// Directory realized segments are written to.
    pub output_dir: PathBuf,
    /// Sleep between depth checks while the queue is at or above target.
    pub idle_interval: Duration,
    /// Ceiling for the exponential backoff after failures.
    pub max_backoff: Duration,
    /// Consecutive failures at which the escalation signal fires.
    pub escalation_threshold: u32,
    /// Extra sleep applied on every failure at or beyond the threshold.
    pub cooldown: Duration,
    /// How long `stop()` waits for the loop task before aborting it.
    pub stop_timeout: Duration,
}

impl PrefetchSettings {
    pub fn new(prompt: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            segment_duration_secs: 30,
            prefetch_target: 3,
            output_dir: output_dir.into(),
            idle_interval: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            escalation_threshold: 5,
            cooldown: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.prompt.trim().is_empty() {
            return Err(SettingsError::EmptyPrompt);
        }
        if self.segment_duration_secs == 0 {
            return Err(SettingsError::NonPositiveDuration);
        }
        if self.escalation_threshold == 0 {
            return Err(SettingsError::ZeroEscalationThreshold);
        }
        if self.idle_interval.is_zero() {
            return Err(SettingsError::ZeroIdleInterval);
        }
        Ok(())
    }
}

/// Configuration problems detected before the loop is allowed to start.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("segment duration must be positive")]
    NonPositiveDuration,

    #[error("escalation threshold must be at least 1")]
    ZeroEscalationThreshold,

    #[error("idle interval must be positive")]
    ZeroIdleInterval,

    #[error("cannot prepare output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single segment could not be produced. Every variant is absorbed by
/// the loop and converted into backoff.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("submit failed: {0}")]
    Submit(#[from] SubmitError),

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("timed out: {0}")]
    TimedOut(WaitLimit),

    #[error("job succeeded without an output reference")]
    MissingOutput,

    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to write segment: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle of the prefetch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
}

/// Observability events broadcast by the loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started,
    /// A new segment was allocated and its job is about to be submitted.
    GenerationStarted { sequence_number: u64 },
    SegmentReady {
        sequence_number: u64,
        path: PathBuf,
        elapsed_ms: u64,
    },
    GenerationFailed { sequence_number: u64, error: String },
    BackingOff {
        consecutive_failures: u32,
        delay_secs: u64,
    },
    /// Consecutive failures reached the escalation threshold.
    Escalated { consecutive_failures: u32 },
    Stopped,
}

/// Snapshot of the loop's lifetime counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub state: LoopState,
    pub queue_size: usize,
    pub segments_generated: u64,
    pub generation_failures: u64,
    pub escalations: u64,
    pub consecutive_failures: u32,
    /// Highest sequence number allocated so far (0 before the first).
    pub last_sequence_number: u64,
}
