//! CLI parse: clap types for Pulse. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pulse CLI - inspect and ship locally stored telemetry
#[derive(Parser)]
#[command(name = "pulse")]
#[command(about = "Inspect, export and prune the Pulse agent's local telemetry store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over defaults and the user config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Storage directory (overrides storage.path from config)
    #[arg(long)]
    pub storage: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored sessions with their pending row counts
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run one export cycle against the configured collector
    Export,
    /// Delete exported sessions, keeping the most recent one
    Purge,
}
