//! Pulse CLI Binary
//!
//! Inspect, export and prune the agent's local telemetry store.

use anyhow::Context;
use clap::Parser;
use pulse::cli::{Cli, RunContext};
use pulse::config::ConfigLoader;
use pulse::logging::{init_logging, LoggingConfig};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli);
    init_logging(Some(&logging_config)).context("Failed to initialize logging")?;

    info!("Pulse CLI starting");

    let context = RunContext::new(cli.config.clone(), cli.storage.clone())
        .context("Failed to open the local telemetry store")?;

    match context.execute(&cli.command) {
        Ok(output) => {
            info!("Command completed successfully");
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e.into())
        }
    }
}

/// CLI flags override the config file, which overrides defaults.
fn build_logging_config(cli: &Cli) -> LoggingConfig {
    let mut config = ConfigLoader::load(cli.config.as_deref())
        .map(|c| c.logging)
        .unwrap_or_default();

    if cli.verbose {
        config.level = "debug".to_string();
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    config
}
