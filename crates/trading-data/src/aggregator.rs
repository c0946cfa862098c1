//! Tick to bar aggregation.

use std::collections::HashMap;
use trading_core::types::{Bar, BarEvent, Timeframe};

/// Buckets trades into fixed-width bars per symbol.
///
/// A bar closes on the first trade of a later bucket, or when [`flush`]
/// is called with a time past the bucket end.
///
/// [`flush`]: BarAggregator::flush
#[derive(Debug)]
pub struct BarAggregator {
    timeframe: Timeframe,
    open: HashMap<String, Bar>,
}

impl BarAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            open: HashMap::new(),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Fold a trade in. Returns the bar it closed, if any.
    pub fn on_trade(&mut self, symbol: &str, timestamp_ms: i64, price: f64, volume: f64) -> Option<BarEvent> {
        let bucket = self.timeframe.bucket_start(timestamp_ms);

        match self.open.get_mut(symbol) {
            Some(bar) if bar.timestamp == bucket => {
                bar.absorb(price, volume);
                None
            }
            // Late trade of an already closed bucket
            Some(bar) if bar.timestamp > bucket => None,
            Some(bar) => {
                let closed = std::mem::replace(bar, Bar::from_trade(bucket, price, volume));
                Some(BarEvent::closed(symbol, self.timeframe, closed))
            }
            None => {
                self.open
                    .insert(symbol.to_string(), Bar::from_trade(bucket, price, volume));
                None
            }
        }
    }

    /// Close every bar whose bucket ended at or before `now_ms`.
    pub fn flush(&mut self, now_ms: i64) -> Vec<BarEvent> {
        let width = self.timeframe.as_millis();
        let expired: Vec<String> = self
            .open
            .iter()
            .filter(|(_, bar)| bar.timestamp + width <= now_ms)
            .map(|(symbol, _)| symbol.clone())
            .collect();

        let mut closed: Vec<BarEvent> = expired
            .into_iter()
            .filter_map(|symbol| {
                self.open
                    .remove(&symbol)
                    .map(|bar| BarEvent::closed(symbol, self.timeframe, bar))
            })
            .collect();
        closed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        closed
    }

    /// The bar currently being built for `symbol`.
    pub fn current(&self, symbol: &str) -> Option<&Bar> {
        self.open.get(symbol)
    }
}
