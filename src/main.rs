mod cli;

use worksound::{
    client::{AceStepClient, JobClient, JobOutcome},
    config,
    generator::PrefetchLoop,
    player::AudioPlayer,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long the consumer waits for a segment before logging and retrying.
const CONSUME_TIMEOUT: Duration = Duration::from_secs(5);

async fn start(config_path: Option<&Path>, no_play: bool) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let player = if no_play {
        None
    } else {
        Some(AudioPlayer::discover(&config.player)?)
    };

    let service = Arc::new(AceStepClient::new(&config.api));
    let client = JobClient::new(service, config.wait_policy());
    let generator = PrefetchLoop::new(client, config.prefetch_settings())
        .context("Invalid prefetch settings")?;

    tracing::info!("Generation service: {}", config.api.base_url());
    tracing::info!("Prompt: {}", config.generation.prompt);
    tracing::info!(
        "Segment length: {}s, prefetch target: {}",
        config.generation.segment_seconds,
        config.generation.prefetch_target
    );

    generator.start();
    tracing::info!("Waiting for the first segment...");

    let started = Instant::now();
    let mut played: u64 = 0;
    let mut shutdown = pin!(tokio::signal::ctrl_c());

    loop {
        let segment = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received stop signal");
                break;
            }
            segment = generator.get_next(CONSUME_TIMEOUT) => segment,
        };

        let Some(segment) = segment else {
            if played > 0 {
                tracing::warn!("Queue is empty; waiting for generation to catch up");
            }
            continue;
        };

        played += 1;
        tracing::info!(
            played,
            sequence_number = segment.sequence_number,
            queue_size = generator.queue_size(),
            elapsed_secs = started.elapsed().as_secs(),
            "Playing {}",
            segment.path.display()
        );

        let playback = async {
            match &player {
                Some(player) => player.play(&segment.path).await,
                None => {
                    tokio::time::sleep(Duration::from_secs(segment.duration_secs.into())).await;
                    Ok(())
                }
            }
        };

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Received stop signal");
                break;
            }
            result = playback => {
                if let Err(e) = result {
                    tracing::error!("Playback failed: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    tracing::info!("Shutting down...");
    generator.stop().await;

    let stats = generator.stats();
    println!("Segments played: {}", played);
    println!("Segments generated: {}", stats.segments_generated);
    println!("Generation failures: {}", stats.generation_failures);
    println!("Escalations: {}", stats.escalations);
    println!("Left in queue: {}", stats.queue_size);
    println!("Uptime: {:.1}s", started.elapsed().as_secs_f64());

    Ok(())
}

async fn generate_one(
    config_path: Option<&Path>,
    duration: u32,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let service = Arc::new(AceStepClient::new(&config.api));
    let client = JobClient::new(service, config.wait_policy());

    println!("Prompt: {}", config.generation.prompt);
    let job_id = client.submit(&config.generation.prompt, duration).await?;
    println!("Job: {}", job_id);

    let result = match client.await_completion(&job_id).await {
        JobOutcome::Succeeded(result) => result,
        JobOutcome::Failed(reason) => anyhow::bail!("Generation failed: {}", reason),
        JobOutcome::TimedOut(limit) => anyhow::bail!("Generation timed out: {}", limit),
    };

    println!("Result: {}", serde_json::to_string_pretty(&result.raw)?);

    let locator = result
        .locator
        .as_ref()
        .context("Job succeeded but reported no audio output")?;
    let audio = client.fetch(locator).await?;

    let path = output.unwrap_or_else(|| config.generation.output_dir.join("test_segment.wav"));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    tokio::fs::write(&path, &audio)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;

    println!("Saved {} bytes to {}", audio.len(), path.display());
    Ok(())
}

async fn check_api(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let client = AceStepClient::new(&config.api);

    println!("Checking {}...", client.base_url());
    let health = client.health().await?;
    println!("{}", serde_json::to_string_pretty(&health)?);
    println!("✓ Generation service is reachable");

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  API: {}", config.api.base_url());
            println!("  Model: {} ({})", config.api.lm_model_path, config.api.lm_backend);
            println!("  Segment length: {}s", config.generation.segment_seconds);
            println!("  Prefetch target: {}", config.generation.prefetch_target);
            println!("  Output dir: {}", config.generation.output_dir.display());
            println!(
                "  Polling: every {}s, {} retries, {}s timeout",
                config.polling.interval_secs,
                config.polling.max_retry,
                config.polling.job_timeout_secs
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  API: {}", config.api.base_url());
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "worksound=trace,reqwest=debug".to_string()
        } else {
            "worksound=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { no_play } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(cli.config.as_deref(), no_play))
        }
        Commands::Generate { duration, output } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(generate_one(cli.config.as_deref(), duration, output))
        }
        Commands::CheckApi => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(check_api(cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("worksound {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
