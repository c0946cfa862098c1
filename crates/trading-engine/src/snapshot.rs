//! Read-only engine state for presentation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use trading_core::types::{OrderId, OrderRecord, SymbolPosition};
use trading_indicators::IndicatorSnapshot;

/// Everything the presentation layer may observe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub running: bool,
    pub positions: Vec<SymbolPosition>,
    pub indicators: BTreeMap<String, IndicatorSnapshot>,
    /// Most recent first
    pub recent_orders: Vec<OrderRecord>,
    pub buying_power: Option<Decimal>,
    pub available_buying_power: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EngineSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&SymbolPosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Bounded history of resolved orders.
#[derive(Debug, Clone)]
pub struct RecentOrders {
    capacity: usize,
    orders: VecDeque<OrderRecord>,
}

impl RecentOrders {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            orders: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn push(&mut self, record: OrderRecord) {
        if self.capacity == 0 {
            return;
        }
        if let Some(existing) = self.orders.iter_mut().find(|r| r.id == record.id) {
            *existing = record;
            return;
        }
        if self.orders.len() >= self.capacity {
            self.orders.pop_front();
        }
        self.orders.push_back(record);
    }

    pub fn get(&self, id: &OrderId) -> Option<&OrderRecord> {
        self.orders.iter().find(|r| &r.id == id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.iter()
    }
}
