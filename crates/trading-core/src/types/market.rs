//! Normalized market data events.
//!
//! Feed adapters decode broker frames once into these types; the engine never
//! sees raw messages.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Bar, Timeframe};

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: u64,
}

impl BookLevel {
    pub fn new(price: Decimal, size: u64) -> Self {
        Self { price, size }
    }
}

/// A trade/quote update for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Last traded price
    pub price: Decimal,
    /// Bid ladder, best first
    pub bid_levels: Vec<BookLevel>,
    /// Ask ladder, best first
    pub ask_levels: Vec<BookLevel>,
}

impl Tick {
    /// A tick carrying only a trade price.
    pub fn trade(symbol: impl Into<String>, timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            price,
            bid_levels: Vec::new(),
            ask_levels: Vec::new(),
        }
    }

    pub fn with_book(mut self, bids: Vec<BookLevel>, asks: Vec<BookLevel>) -> Self {
        self.bid_levels = bids;
        self.ask_levels = asks;
        self
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bid_levels.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.ask_levels.first().map(|l| l.price)
    }
}

/// A bar update. `is_closed == false` marks an in-progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarEvent {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bar: Bar,
    pub is_closed: bool,
}

impl BarEvent {
    pub fn closed(symbol: impl Into<String>, timeframe: Timeframe, bar: Bar) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bar,
            is_closed: true,
        }
    }
}

/// Everything a market data feed can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarketEvent {
    Tick(Tick),
    Bar(BarEvent),
    /// The feed (re)established its subscription.
    Connected,
    /// The feed lost its connection and is resubscribing.
    Disconnected { reason: String },
}

impl MarketEvent {
    /// The symbol the event belongs to, if any.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketEvent::Tick(t) => Some(&t.symbol),
            MarketEvent::Bar(b) => Some(&b.symbol),
            MarketEvent::Connected | MarketEvent::Disconnected { .. } => None,
        }
    }
}
