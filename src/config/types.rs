use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::WaitPolicy;
use crate::generator::PrefetchSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    #[serde(default)]
    pub player: PlayerConfig,
}

impl Config {
    /// Polling policy for the job client.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_secs_f64(self.polling.interval_secs),
            timeout: Duration::from_secs(self.polling.job_timeout_secs),
            max_poll_retries: self.polling.max_retry,
        }
    }

    /// Settings for the prefetch loop.
    pub fn prefetch_settings(&self) -> PrefetchSettings {
        PrefetchSettings {
            prompt: self.generation.prompt.clone(),
            segment_duration_secs: self.generation.segment_seconds,
            prefetch_target: self.generation.prefetch_target,
            output_dir: self.generation.output_dir.clone(),
            idle_interval: Duration::from_millis(self.backoff.idle_interval_ms),
            max_backoff: Duration::from_secs(self.backoff.max_backoff_secs),
            escalation_threshold: self.backoff.escalation_threshold,
            cooldown: Duration::from_secs(self.backoff.cooldown_secs),
            stop_timeout: Duration::from_secs(self.backoff.stop_timeout_secs),
        }
    }
}

/// Connection to the generation service and the fixed model selectors sent
/// with every request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Full base URL; overrides `host` and `port` when set.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_task_type")]
    pub task_type: String,

    /// Enable the language model's thinking mode.
    #[serde(default = "default_true")]
    pub thinking: bool,

    #[serde(default = "default_lm_backend")]
    pub lm_backend: String,

    #[serde(default = "default_lm_model_path")]
    pub lm_model_path: String,

    /// Diffusion model configuration (`config_path` on the wire).
    #[serde(default = "default_model_config")]
    pub model_config: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,
}

impl ApiConfig {
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    8001
}
fn default_task_type() -> String {
    "text2music".to_string()
}
fn default_true() -> bool {
    true
}
fn default_lm_backend() -> String {
    "vllm".to_string()
}
fn default_lm_model_path() -> String {
    "acestep-5Hz-lm-0.6B".to_string()
}
fn default_model_config() -> String {
    "acestep-v15-turbo".to_string()
}
fn default_request_timeout() -> u64 {
    10
}
fn default_download_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            base_url: None,
            task_type: default_task_type(),
            thinking: default_true(),
            lm_backend: default_lm_backend(),
            lm_model_path: default_lm_model_path(),
            model_config: default_model_config(),
            request_timeout_secs: default_request_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Length of each generated segment
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,

    /// Number of ready segments to keep buffered
    #[serde(default = "default_prefetch_target")]
    pub prefetch_target: usize,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_prompt() -> String {
    "calm ambient soundscape, lo-fi, soft textures, suited to focused work".to_string()
}
fn default_segment_seconds() -> u32 {
    30
}
fn default_prefetch_target() -> usize {
    3
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./generated_audio")
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt: default_prompt(),
            segment_seconds: default_segment_seconds(),
            prefetch_target: default_prefetch_target(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Seconds between two polls of the same job
    #[serde(default = "default_poll_interval")]
    pub interval_secs: f64,

    /// Consecutive poll errors tolerated per job
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Upper bound on waiting for a single job
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_poll_interval() -> f64 {
    1.5
}
fn default_max_retry() -> u32 {
    2
}
fn default_job_timeout() -> u64 {
    300
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_retry: default_max_retry(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Consecutive failures before the escalation warning
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Sleep between queue checks while the prefetch target is met
    #[serde(default = "default_idle_interval")]
    pub idle_interval_ms: u64,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_max_backoff() -> u64 {
    60
}
fn default_escalation_threshold() -> u32 {
    5
}
fn default_cooldown() -> u64 {
    10
}
fn default_idle_interval() -> u64 {
    2000
}
fn default_stop_timeout() -> u64 {
    10
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: default_max_backoff(),
            escalation_threshold: default_escalation_threshold(),
            cooldown_secs: default_cooldown(),
            idle_interval_ms: default_idle_interval(),
            stop_timeout_secs: default_stop_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Player executable, resolved through PATH
    #[serde(default = "default_player_command")]
    pub command: String,

    /// Arguments placed before the segment path
    #[serde(default = "default_player_args")]
    pub args: Vec<String>,
}

fn default_player_command() -> String {
    "ffplay".to_string()
}
fn default_player_args() -> Vec<String> {
    ["-nodisp", "-autoexit", "-loglevel", "quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: default_player_args(),
        }
    }
}
