mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables that override file settings.
const ENV_PREFIX: &str = "WORKSOUND_";

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./config.toml",
        "./worksound.toml",
        "~/.config/worksound/config.toml",
        "/etc/worksound/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Apply `WORKSOUND_*` overrides on top of file settings.
///
/// `lookup` resolves a full variable name; it is a parameter so callers can
/// supply something other than the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| {
        lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|value| !value.trim().is_empty())
    };

    if let Some(host) = var("API_HOST") {
        config.api.host = host;
    }
    if let Some(port) = var("API_PORT") {
        config.api.port = parse_var("API_PORT", &port)?;
    }
    if let Some(path) = var("LM_MODEL_PATH") {
        config.api.lm_model_path = path;
    }
    if let Some(backend) = var("LM_BACKEND") {
        config.api.lm_backend = backend;
    }
    if let Some(model_config) = var("CONFIG_PATH") {
        config.api.model_config = model_config;
    }
    if let Some(seconds) = var("SEGMENT_SECONDS") {
        config.generation.segment_seconds = parse_var("SEGMENT_SECONDS", &seconds)?;
    }
    if let Some(target) = var("PREFETCH_TARGET") {
        config.generation.prefetch_target = parse_var("PREFETCH_TARGET", &target)?;
    }
    if let Some(prompt) = var("PROMPT") {
        config.generation.prompt = prompt;
    }
    if let Some(dir) = var("OUTPUT_DIR") {
        config.generation.output_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
    }
    if let Some(interval) = var("POLL_INTERVAL_SEC") {
        config.polling.interval_secs = parse_var("POLL_INTERVAL_SEC", &interval)?;
    }
    if let Some(retries) = var("MAX_RETRY") {
        config.polling.max_retry = parse_var("MAX_RETRY", &retries)?;
    }

    Ok(())
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}{}: {:?}", ENV_PREFIX, name, value))
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.api.host.trim().is_empty() && config.api.base_url.is_none() {
        anyhow::bail!("API host cannot be empty");
    }

    if config.generation.prompt.trim().is_empty() {
        anyhow::bail!("Generation prompt cannot be empty");
    }

    if config.generation.segment_seconds == 0 {
        anyhow::bail!("Segment duration must be positive");
    }

    if config.generation.prefetch_target == 0 {
        tracing::warn!("Prefetch target is 0; no segments will be generated");
    }

    match Duration::try_from_secs_f64(config.polling.interval_secs) {
        Ok(interval) if !interval.is_zero() => {}
        _ => anyhow::bail!(
            "Poll interval must be a positive number of seconds, got {}",
            config.polling.interval_secs
        ),
    }

    if config.polling.job_timeout_secs == 0 {
        anyhow::bail!("Job timeout must be positive");
    }

    if config.backoff.escalation_threshold == 0 {
        anyhow::bail!("Escalation threshold must be at least 1");
    }

    if config.backoff.idle_interval_ms == 0 {
        anyhow::bail!("Idle interval must be positive");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        validate_config(&config).unwrap();
        assert_eq!(config.api.base_url(), "http://127.0.0.1:8001");
        assert_eq!(config.generation.segment_seconds, 30);
        assert_eq!(config.generation.prefetch_target, 3);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config: Config = toml::from_str(
            r#"
            [api]
            base_url = "http://gpu-box:9000/"

            [generation]
            prompt = "rain on a window"
            prefetch_target = 2

            [polling]
            interval_secs = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url(), "http://gpu-box:9000/");
        assert_eq!(config.api.lm_backend, "vllm");
        assert_eq!(config.generation.segment_seconds, 30);

        let policy = config.wait_policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(500));
        assert_eq!(policy.max_poll_retries, 2);

        let settings = config.prefetch_settings();
        assert_eq!(settings.prefetch_target, 2);
        assert_eq!(settings.prompt, "rain on a window");
        assert_eq!(settings.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = Config::default();
        let vars = env(&[
            ("WORKSOUND_API_HOST", "10.0.0.5"),
            ("WORKSOUND_API_PORT", "8100"),
            ("WORKSOUND_SEGMENT_SECONDS", "12"),
            ("WORKSOUND_POLL_INTERVAL_SEC", "0.25"),
            ("WORKSOUND_PROMPT", ""),
        ]);

        apply_env_overrides(&mut config, |key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.api.base_url(), "http://10.0.0.5:8100");
        assert_eq!(config.generation.segment_seconds, 12);
        assert_eq!(config.polling.interval_secs, 0.25);
        // Empty values are ignored.
        assert_eq!(config.generation.prompt, Config::default().generation.prompt);
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut config = Config::default();
        let vars = env(&[("WORKSOUND_PREFETCH_TARGET", "three")]);
        let err = apply_env_overrides(&mut config, |key| vars.get(key).cloned()).unwrap_err();
        assert!(err.to_string().contains("WORKSOUND_PREFETCH_TARGET"));
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut config = Config::default();
        config.generation.segment_seconds = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unrepresentable_poll_interval_is_rejected() {
        for interval in [0.0, -1.5, 1e30, f64::NAN, f64::INFINITY, 1e-12] {
            let mut config = Config::default();
            config.polling.interval_secs = interval;
            assert!(
                validate_config(&config).is_err(),
                "interval {} should be rejected",
                interval
            );
        }

        let mut config = Config::default();
        config.polling.interval_secs = 0.25;
        validate_config(&config).unwrap();
        assert_eq!(config.wait_policy().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn zero_prefetch_target_is_allowed() {
        let mut config = Config::default();
        config.generation.prefetch_target = 0;
        validate_config(&config).unwrap();
    }

    #[test]
    #[serial_test::serial]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worksound.toml");
        std::fs::write(
            &path,
            "[generation]\nsegment_seconds = 20\n[backoff]\nescalation_threshold = 3\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.generation.segment_seconds, 20);
        assert_eq!(config.backoff.escalation_threshold, 3);
    }

    #[test]
    #[serial_test::serial]
    fn load_config_applies_process_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worksound.toml");
        std::fs::write(&path, "[generation]\nprefetch_target = 4\n").unwrap();

        std::env::set_var("WORKSOUND_PREFETCH_TARGET", "1");
        let result = load_config(&path);
        std::env::remove_var("WORKSOUND_PREFETCH_TARGET");

        assert_eq!(result.unwrap().generation.prefetch_target, 1);
    }

    #[test]
    #[serial_test::serial]
    fn load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[polling]\njob_timeout_secs = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
