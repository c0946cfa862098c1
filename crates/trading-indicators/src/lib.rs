//! Technical indicators for the auto-trader.
//!
//! - Simple moving average (batch and streaming)
//! - Wilder RSI (batch and streaming)
//! - Trend and momentum snapshots computed from closed bars

pub mod momentum;
pub mod moving_average;
pub mod snapshot;

pub use momentum::{Rsi, StreamingRsi};
pub use moving_average::{Sma, StreamingSma};
pub use snapshot::{IndicatorEngine, IndicatorSnapshot, MomentumSnapshot, TrendSnapshot};
