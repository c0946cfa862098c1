//! Core traits for the auto-trader.

mod feed;
mod gateway;
mod indicator;
mod strategy;

pub use feed::{AccessTokenProvider, HistorySource, MarketDataFeed};
pub use gateway::OrderGateway;
pub use indicator::{Indicator, StreamingIndicator};
pub use strategy::StrategyConfig;
