//! Core types and traits for the auto-trader.
//!
//! This crate provides the foundational building blocks including:
//! - Market data types (Bar, BarSeries, Tick, MarketEvent)
//! - Order intents, order records and per-symbol position state
//! - Core traits for indicators, the order gateway and market data feeds

pub mod types;
pub mod traits;
pub mod error;

pub use error::{TradingError, TradingResult};
pub use types::*;
pub use traits::*;
