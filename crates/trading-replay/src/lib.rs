//! Offline replay of recorded bars through the trading engine.

mod engine;
mod report;
mod statistics;

pub use engine::{ReplayConfig, ReplayEngine};
pub use report::ReplayReport;
pub use statistics::{ReplayStats, TradeRecord};
