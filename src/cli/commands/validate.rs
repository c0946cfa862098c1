//! Validate configuration command.

use anyhow::Result;
use trading_config::{to_toml, AppConfig};

/// Print the effective configuration. Loading already validated it.
pub async fn run(config: &AppConfig) -> Result<()> {
    println!("# Configuration is valid");
    println!("{}", to_toml(config)?);
    Ok(())
}
