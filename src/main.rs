//! Auto-trader CLI application.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use trading_config::load_config;
use trading_monitor::setup_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Invalid configuration in {}", path.display()),
        None => "Invalid configuration".to_string(),
    })?;

    let log_level = cli
        .log_level
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| config.logging.level.clone());
    let json = cli.json_logs || config.logging.is_json();
    let _log_guard = setup_logging(&log_level, json, config.logging.file.as_deref().map(Path::new))?;

    match cli.command {
        Commands::Live(args) => cli::commands::live::run(args, config).await,
        Commands::Paper(args) => cli::commands::paper::run(args, config).await,
        Commands::Replay(args) => cli::commands::replay::run(args, config).await,
        Commands::ValidateConfig => cli::commands::validate::run(&config).await,
    }
}
