use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "worksound")]
#[command(author, version, about = "Endless generated background music for focused work")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start prefetching segments and play them back continuously
    Start {
        /// Only generate and consume segments, without running the player
        #[arg(long)]
        no_play: bool,
    },

    /// Generate a single segment and save it
    Generate {
        /// Segment length in seconds
        #[arg(short, long, default_value = "10")]
        duration: u32,

        /// Where to write the audio (defaults to the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the generation service is reachable
    CheckApi,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
