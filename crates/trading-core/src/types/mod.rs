//! Core data types for the auto-trader.

mod market;
mod ohlcv;
mod order;
mod position;
mod timeframe;

pub use market::{BarEvent, BookLevel, MarketEvent, Tick};
pub use ohlcv::{Bar, BarSeries};
pub use order::{
    Fill, IntentId, IntentReason, OrderId, OrderIntent, OrderKind, OrderRecord, OrderStatus,
    OrderStatusReport, Side,
};
pub use position::{
    EntryLevel, ExitOrder, PositionState, RealizedStage, SymbolPosition,
};
pub use timeframe::Timeframe;
