//! CLI command implementations.

pub mod live;
pub mod paper;
pub mod replay;
pub mod session;
pub mod validate;

use anyhow::{Context, Result};
use trading_config::AppConfig;

/// Replace the configured symbols when the command line names any.
pub fn apply_symbols(config: &mut AppConfig, symbols: &[String]) -> Result<()> {
    if symbols.is_empty() {
        return Ok(());
    }
    config.engine.symbols = symbols.iter().map(|s| s.trim().to_string()).collect();
    config
        .validate()
        .context("Invalid symbols on the command line")
}
