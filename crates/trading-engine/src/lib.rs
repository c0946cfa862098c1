//! Decision and execution engine of the auto-trader.
//!
//! The engine consumes market events and gateway results, evaluates the
//! trend-filtered RSI entry and the two-stage profit taking per symbol, and
//! emits order actions. [`runtime::EngineRuntime`] drives it on tokio.

pub mod engine;
pub mod ladder;
pub mod params;
pub mod rules;
pub mod runtime;
pub mod snapshot;

pub use engine::{
    EngineAction, EngineCommand, EngineEvent, EngineSettings, TradingEngine, SIGNAL_TIMEFRAME,
};
pub use ladder::{plan_entry, EntryPlan, LadderLevel};
pub use params::{
    EntrySizing, ExitPricing, LevelSource, ProfitBasis, QuantitySplit, SessionWindow,
    StrategyParams, MAX_ENTRY_LEVELS,
};
pub use rules::{evaluate_entry, evaluate_exit, EntrySkip, ExitSignal};
pub use runtime::{forward_market_events, EngineHandle, EngineRuntime};
pub use snapshot::{EngineSnapshot, RecentOrders};
