//! MirrorSync CLI
//!
//! Command-line tools for MirrorSync store directories.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics
//! - `list` - List mirrored entities
//! - `dump-queue` - Dump pending operations
//! - `verify` - Verify journal integrity
//! - `compact` - Rewrite the journal as a single snapshot
//! - `clear-pending` - Drop every pending operation

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MirrorSync command-line store tools.
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List mirrored entities
    List {
        /// Only entities with unsynced local edits
        #[arg(short, long)]
        dirty: bool,

        /// Case-insensitive text search over string fields
        #[arg(short, long)]
        search: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump pending operations in the order they will be sent
    DumpQueue {
        /// Maximum number of operations to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify journal integrity
    Verify,

    /// Rewrite the journal as a single snapshot
    Compact {
        /// Dry run - show the current size only
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Drop every pending operation and mark all entities clean
    ClearPending {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::List {
            dirty,
            search,
            format,
        } => {
            let path = cli.path.ok_or("Store path required for list")?;
            commands::list::run(&path, dirty, search, &format)?;
        }
        Commands::DumpQueue { limit, format } => {
            let path = cli.path.ok_or("Store path required for dump-queue")?;
            commands::dump_queue::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::ClearPending { yes } => {
            let path = cli.path.ok_or("Store path required for clear-pending")?;
            if !yes {
                return Err("clear-pending discards unsynced edits; pass --yes to confirm".into());
            }
            commands::clear_pending::run(&path)?;
        }
        Commands::Version => {
            println!("MirrorSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
