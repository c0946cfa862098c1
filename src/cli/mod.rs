//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(author, version, about = "RSI pullback auto-trader with two-stage profit taking")]
pub struct Cli {
    /// Configuration file path (defaults apply without one)
    #[arg(short, long, env = "AUTOTRADER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Enable JSON log format
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Trade on the configured broker server
    Live(LiveArgs),
    /// Trade on the broker's paper server or an in-process paper broker
    Paper(PaperArgs),
    /// Replay recorded CSV bars against the paper broker
    Replay(ReplayArgs),
    /// Validate configuration and print the effective settings
    ValidateConfig,
}

#[derive(clap::Args)]
pub struct LiveArgs {
    /// Symbols to trade (comma-separated), overrides the configuration
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}

#[derive(clap::Args)]
pub struct PaperArgs {
    /// Symbols to trade (comma-separated), overrides the configuration
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Fill orders in-process against streamed prices instead of the paper server
    #[arg(long)]
    pub local: bool,

    /// Starting cash of the in-process broker
    #[arg(long)]
    pub cash: Option<Decimal>,
}

#[derive(clap::Args)]
pub struct ReplayArgs {
    /// Directory holding {symbol}_daily.csv and {symbol}_10m.csv
    #[arg(long)]
    pub data: PathBuf,

    /// Symbols to replay (comma-separated), overrides the configuration
    #[arg(short = 'S', long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Starting cash
    #[arg(long)]
    pub cash: Option<Decimal>,

    /// Commission per share
    #[arg(long, default_value = "0")]
    pub commission: Decimal,

    /// Slippage percentage for market orders
    #[arg(long, default_value = "0.05")]
    pub slippage: Decimal,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub output: String,

    /// Save the JSON report to a file
    #[arg(long)]
    pub save: Option<PathBuf>,
}
