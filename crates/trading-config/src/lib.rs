//! Configuration management.

mod settings;

pub use settings::{AppConfig, AppSettings, BrokerConfig, LoggingConfig, DEFAULT_SYMBOLS};

use config::{Config, Environment, File};
use std::path::Path;
use thiserror::Error;
use trading_core::error::{StrategyError, TradingError};

/// Prefix of environment overrides, e.g. `TRADING__ENGINE__POLL_INTERVAL_MS`.
pub const ENV_PREFIX: &str = "TRADING";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid strategy parameters: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl From<ConfigError> for TradingError {
    fn from(e: ConfigError) -> Self {
        TradingError::Config(e.to_string())
    }
}

/// Load configuration from an optional file and the environment, then validate it.
///
/// Without a file every section starts from its defaults.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("engine.symbols")
                .try_parsing(true),
        )
        .build()?;

    let app: AppConfig = config.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

/// Render the effective configuration as TOML.
pub fn to_toml(config: &AppConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
