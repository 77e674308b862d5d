//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod baseline;
mod checkpoint;
mod init;
mod runs;
mod sync;
mod verify;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "wikisync")]
#[command(about = "Incremental synchronization for a local wiki mirror")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the database and downloaded files
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Fetch everything that changed on the origin since the last successful run
    Sync {
        /// Discard any checkpoint and start a new change window
        #[arg(long)]
        fresh: bool,
        /// Number of concurrent fetch workers
        #[arg(short, long)]
        workers: Option<usize>,
        /// Skip the file phase
        #[arg(long)]
        no_files: bool,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register an existing full mirror as the starting point for incremental runs
    Baseline {
        /// Time the full mirror was taken (RFC 3339, default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Show recent runs from the ledger
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or discard the resume checkpoint
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommands,
    },

    /// Run the mirror integrity checks
    Verify {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CheckpointCommands {
    /// Show the stored checkpoint, if any
    Show,
    /// Delete the stored checkpoint so the next run starts a new window
    Clear,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Sync {
            fresh,
            workers,
            no_files,
            json,
        } => sync::cmd_sync(&settings, fresh, workers, no_files, json).await,
        Commands::Baseline { at } => baseline::cmd_baseline(&settings, at.as_deref()).await,
        Commands::Runs { limit, json } => runs::cmd_runs(&settings, limit, json).await,
        Commands::Checkpoint { command } => match command {
            CheckpointCommands::Show => checkpoint::cmd_checkpoint_show(&settings).await,
            CheckpointCommands::Clear => checkpoint::cmd_checkpoint_clear(&settings).await,
        },
        Commands::Verify { json } => verify::cmd_verify(&settings, json).await,
    }
}
