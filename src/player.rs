//! Segment playback through an external player process.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::PlayerConfig;

/// Plays audio files by running an external command once per file.
#[derive(Debug, Clone)]
pub struct AudioPlayer {
    program: PathBuf,
    args: Vec<String>,
}

impl AudioPlayer {
    /// Resolve the configured player on `PATH`.
    pub fn discover(config: &PlayerConfig) -> Result<Self> {
        let program = which::which(&config.command).with_context(|| {
            format!(
                "Player '{}' not found in PATH; install it (ffplay ships with ffmpeg)",
                config.command
            )
        })?;

        Ok(Self::with_program(program, config.args.clone()))
    }

    pub fn with_program(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Play `file` to completion.
    pub async fn play(&self, file: &Path) -> Result<()> {
        if !file.exists() {
            anyhow::bail!("Audio file does not exist: {:?}", file);
        }

        tracing::info!("Playing {}", file.display());

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {:?}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{:?} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }

        tracing::debug!("Finished {}", file.display());
        Ok(())
    }
}
