//! Configuration structures.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use trading_broker::{BackoffPolicy, Server};
use trading_core::traits::StrategyConfig;
use trading_data::FeedSettings;
use trading_engine::{EngineSettings, StrategyParams};

use crate::ConfigError;

/// Symbols traded when the configuration names none.
pub const DEFAULT_SYMBOLS: [&str; 5] = ["091990", "096770", "069500", "003490", "005380"];

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSettings,
    pub logging: LoggingConfig,
    pub broker: BrokerConfig,
    pub strategy: StrategyParams,
    pub engine: EngineSettings,
    pub feed: FeedSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSettings::default(),
            logging: LoggingConfig::default(),
            broker: BrokerConfig::default(),
            strategy: StrategyParams::default(),
            engine: EngineSettings {
                symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                ..EngineSettings::default()
            },
            feed: FeedSettings::default(),
        }
    }
}

impl AppConfig {
    /// Check every section, stopping at the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        self.logging.validate()?;
        self.broker.validate()?;

        let engine = &self.engine;
        if engine.symbols.is_empty() {
            return Err(invalid("At least one symbol is required"));
        }
        let mut seen = HashSet::new();
        for symbol in &engine.symbols {
            if symbol.trim().is_empty() {
                return Err(invalid("Symbols must not be blank"));
            }
            if !seen.insert(symbol.as_str()) {
                return Err(invalid(format!("Duplicate symbol: {}", symbol)));
            }
        }
        if engine.order_deadline_ms == 0 || engine.poll_interval_ms == 0 {
            return Err(invalid("Order deadline and poll interval must be positive"));
        }
        if engine.recent_orders_capacity == 0 {
            return Err(invalid("Recent orders capacity must be positive"));
        }
        // The indicators need at least this much history to produce a value
        if engine.daily_history_bars < self.strategy.long_ma_period {
            return Err(invalid(format!(
                "Daily history ({}) is shorter than the long MA period ({})",
                engine.daily_history_bars, self.strategy.long_ma_period
            )));
        }
        if engine.intraday_history_bars <= self.strategy.rsi_period {
            return Err(invalid(format!(
                "Intraday history ({}) must exceed the RSI period ({})",
                engine.intraday_history_bars, self.strategy.rsi_period
            )));
        }

        if self.feed.channel_capacity == 0 {
            return Err(invalid("Feed channel capacity must be positive"));
        }
        if self.feed.reconnect_initial_ms == 0 || self.feed.reconnect_initial_ms > self.feed.reconnect_max_ms {
            return Err(invalid("Feed reconnect delays must satisfy 0 < initial <= max"));
        }
        Ok(())
    }
}

/// General app settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub environment: String,
    /// Period of the position report in the log (0 = off)
    pub report_interval_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "autotrader".to_string(),
            environment: "development".to_string(),
            report_interval_secs: 60,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    /// Directory of the daily-rolling log file
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.format.to_lowercase().as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(invalid(format!("Unknown log format: {}", other))),
        }
    }
}

/// Brokerage connection settings.
///
/// Credentials are never stored in the file, only the names of the
/// environment variables holding them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub server: Server,
    pub app_key_env: String,
    pub secret_key_env: String,
    pub request_timeout_ms: u64,
    /// Overrides the server's REST base URL
    pub rest_url: Option<String>,
    /// Overrides the server's streaming URL
    pub ws_url: Option<String>,
    pub retry: BackoffPolicy,
    /// Starting cash of the in-process paper broker
    pub paper_cash: rust_decimal::Decimal,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            server: Server::Paper,
            app_key_env: "KIWOOM_APP_KEY".to_string(),
            secret_key_env: "KIWOOM_SECRET_KEY".to_string(),
            request_timeout_ms: 10_000,
            rest_url: None,
            ws_url: None,
            retry: BackoffPolicy::default(),
            paper_cash: rust_decimal::Decimal::from(10_000_000),
        }
    }
}

impl BrokerConfig {
    pub fn rest_url(&self) -> &str {
        self.rest_url.as_deref().unwrap_or(self.server.rest_url())
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or(self.server.ws_url())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.app_key_env.is_empty() || self.secret_key_env.is_empty() {
            return Err(invalid("Credential environment variable names must be set"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("Request timeout must be positive"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid("Retry multiplier must be at least 1"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("Retry initial delay exceeds the maximum"));
        }
        if self.paper_cash.is_sign_negative() {
            return Err(invalid("Paper cash must not be negative"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
