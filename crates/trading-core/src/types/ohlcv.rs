//! Price bars.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::Timeframe;

/// One OHLCV bar. Prices stay `f64` because they only feed the indicators;
/// order prices are `Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Bar {
    /// Bar open time, Unix milliseconds
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar opened by a single trade.
    pub fn from_trade(timestamp: i64, price: f64, volume: f64) -> Self {
        Self::new(timestamp, price, price, price, price, volume)
    }

    /// Fold a later trade of the same bucket into the bar.
    pub fn absorb(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }
}

/// Closed bars of one symbol and timeframe, oldest first, with strictly
/// increasing open times.
///
/// A non-zero capacity keeps only the newest bars; indicators never look
/// further back than their longest period.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarSeries {
    /// Unbounded series.
    pub fn new(symbol: String, timeframe: Timeframe) -> Self {
        Self::with_capacity(symbol, timeframe, 0)
    }

    pub fn with_capacity(symbol: String, timeframe: Timeframe, capacity: usize) -> Self {
        Self {
            symbol,
            timeframe,
            bars: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append without ordering checks, evicting the oldest bar when full.
    pub fn push(&mut self, bar: Bar) {
        if self.capacity > 0 && self.bars.len() >= self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
    }

    /// Insert a closed bar keeping open times strictly increasing.
    ///
    /// A bar with the newest open time replaces it (a corrected close); an
    /// older one is stale and dropped. Returns `true` when the series
    /// changed.
    pub fn upsert(&mut self, bar: Bar) -> bool {
        match self.bars.back_mut() {
            Some(last) if last.timestamp == bar.timestamp => {
                let changed = *last != bar;
                *last = bar;
                changed
            }
            Some(last) if last.timestamp > bar.timestamp => false,
            _ => {
                self.push(bar);
                true
            }
        }
    }

    /// Upsert a batch of bars in order.
    pub fn extend(&mut self, bars: impl IntoIterator<Item = Bar>) {
        for bar in bars {
            self.upsert(bar);
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    /// Close prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}
