//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nutrition data cache daemon
#[derive(Parser)]
#[command(name = "nutrid")]
#[command(about = "nutrid - Versioned nutrition data cache", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides /etc/nutrid/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the update scheduler until SIGTERM/SIGINT
    Run,

    /// Update one source or all sources now
    Update {
        /// Source to update (default: all)
        #[arg(long)]
        source: Option<String>,

        /// Write a new version even if nothing changed
        #[arg(long)]
        force: bool,
    },

    /// Restore a backed-up version
    Rollback {
        source: String,
        version: String,
    },

    /// Show dataset versions
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// List retained backups of a source
    Backups { source: String },

    /// Search foods, cache-first
    Search {
        query: String,

        /// Source to ask on a cache miss
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}
