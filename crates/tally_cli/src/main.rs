//! Tally CLI
//!
//! Command-line tools for syncing a local Tally ledger.
//!
//! # Commands
//!
//! - `sync` - Run one sync cycle (incremental, or full with `--full`)
//! - `watch` - Run the automatic sync loop until interrupted
//! - `status` - Show sync configuration and progress
//! - `log` - Show recent sync log entries
//! - `compact` - Remove tombstones both sides already hold
//! - `inspect` - Display local store statistics and records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tally ledger sync tools.
#[derive(Parser)]
#[command(name = "tally")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON sync configuration
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Directory holding the local store, checkpoint and sync log
    #[arg(global = true, short, long, default_value = ".tally")]
    data: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync cycle
    Sync {
        /// Pull and push everything instead of changes since the last sync
        #[arg(long)]
        full: bool,

        /// Retry transient network failures with backoff
        #[arg(long)]
        retry: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the automatic sync loop until Ctrl-C
    Watch {
        /// Run a full sync before entering the loop
        #[arg(long)]
        initial_full: bool,
    },

    /// Show sync configuration and progress
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show recent sync log entries
    Log {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Only show entries that did not complete cleanly
        #[arg(long)]
        problems: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove tombstones the remote is known to hold
    Compact {
        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Display local store statistics
    Inspect {
        /// List every record
        #[arg(short, long)]
        records: bool,

        /// Include tombstones in the record list
        #[arg(short, long)]
        tombstones: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let data = commands::DataDir::new(cli.data);

    match cli.command {
        Commands::Sync {
            full,
            retry,
            format,
        } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let engine = data.open_engine(config)?;
            commands::sync::run(&engine, full, retry, &format)?;
        }
        Commands::Watch { initial_full } => {
            let config = commands::load_config(cli.config.as_deref())?;
            commands::watch::run(data.open_engine(config)?, initial_full)?;
        }
        Commands::Status { format } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let engine = data.open_engine(config)?;
            commands::status::run(&engine, &format)?;
        }
        Commands::Log {
            limit,
            problems,
            format,
        } => {
            commands::log::run(&data, limit, problems, &format)?;
        }
        Commands::Compact { dry_run } => {
            let config = commands::load_config(cli.config.as_deref())?;
            let engine = data.open_engine(config)?;
            commands::compact::run(&engine, dry_run)?;
        }
        Commands::Inspect {
            records,
            tombstones,
            format,
        } => {
            commands::inspect::run(&data, records, tombstones, &format)?;
        }
    }

    Ok(())
}
