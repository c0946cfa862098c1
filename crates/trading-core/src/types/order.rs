//! Order intents, order records and status reports.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Execute immediately at best available price
    Market,
    /// Execute at the specified price or better
    Limit,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Fill status of an order as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Submitted or awaiting confirmation, nothing filled yet
    #[default]
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Check if the order is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Check if the order is active (can still be filled).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Gateway-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Engine-assigned identifier of an intent, known before the gateway answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentId(pub Uuid);

impl IntentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IntentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the engine wants an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum IntentReason {
    /// One rung of the distributed entry ladder (0 = highest price)
    Entry { level: usize },
    /// Partial profit-taking sale
    FirstTakeProfit,
    /// Sale of the remaining quantity
    SecondTakeProfit,
}

impl fmt::Display for IntentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentReason::Entry { level } => write!(f, "entry level {}", level + 1),
            IntentReason::FirstTakeProfit => write!(f, "first take-profit"),
            IntentReason::SecondTakeProfit => write!(f, "second take-profit"),
        }
    }
}

/// An engine-generated, not yet confirmed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: IntentId,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    /// Limit price; `None` for market orders
    pub price: Option<Decimal>,
    pub quantity: u64,
    pub reason: IntentReason,
}

impl OrderIntent {
    /// Create a limit order intent.
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        quantity: u64,
        reason: IntentReason,
    ) -> Self {
        Self {
            id: IntentId::new(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit,
            price: Some(price),
            quantity,
            reason,
        }
    }

    /// Create a market order intent.
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: u64,
        reason: IntentReason,
    ) -> Self {
        Self {
            id: IntentId::new(),
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            price: None,
            quantity,
            reason,
        }
    }

    /// Notional value at the limit price, zero for market orders.
    pub fn notional(&self) -> Decimal {
        self.price.unwrap_or(Decimal::ZERO) * Decimal::from(self.quantity)
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.reason, IntentReason::Entry { .. })
    }
}

/// Status snapshot returned by `OrderGateway::get_order_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub status: OrderStatus,
    /// Cumulative filled quantity
    pub filled_quantity: u64,
    /// Average price over the cumulative fills
    pub avg_fill_price: Option<Decimal>,
}

impl OrderStatusReport {
    pub fn pending() -> Self {
        Self {
            status: OrderStatus::Pending,
            filled_quantity: 0,
            avg_fill_price: None,
        }
    }

    pub fn filled(quantity: u64, price: Decimal) -> Self {
        Self {
            status: OrderStatus::Filled,
            filled_quantity: quantity,
            avg_fill_price: Some(price),
        }
    }

    pub fn partially_filled(quantity: u64, price: Decimal) -> Self {
        Self {
            status: OrderStatus::PartiallyFilled,
            filled_quantity: quantity,
            avg_fill_price: Some(price),
        }
    }

    pub fn terminal(status: OrderStatus) -> Self {
        Self {
            status,
            filled_quantity: 0,
            avg_fill_price: None,
        }
    }
}

/// Newly observed execution, derived from two consecutive status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub quantity: u64,
    pub price: Decimal,
}

/// An accepted order owned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub intent: OrderIntent,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub avg_fill_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The placement call exceeded its deadline before the id arrived.
    pub overdue: bool,
}

impl OrderRecord {
    /// Create a record for an intent the gateway accepted.
    pub fn accepted(id: OrderId, intent: OrderIntent, now: DateTime<Utc>) -> Self {
        Self {
            id,
            intent,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            avg_fill_price: None,
            created_at: now,
            updated_at: now,
            overdue: false,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.intent.symbol
    }

    /// Apply a status report and return the execution it reveals, if any.
    ///
    /// Reports are cumulative, so the new fill is the difference to the last
    /// observed state. Terminal records ignore further reports and stale
    /// reports never reduce the filled quantity.
    pub fn apply_report(&mut self, report: &OrderStatusReport, now: DateTime<Utc>) -> Option<Fill> {
        if self.status.is_terminal() {
            return None;
        }

        let filled = report.filled_quantity.min(self.intent.quantity);
        let fill = if filled > self.filled_quantity {
            let delta = filled - self.filled_quantity;
            let new_avg = report
                .avg_fill_price
                .or(self.intent.price)
                .unwrap_or(Decimal::ZERO);
            let prev_value = self.avg_fill_price.unwrap_or(Decimal::ZERO)
                * Decimal::from(self.filled_quantity);
            let total_value = new_avg * Decimal::from(filled);
            let price = (total_value - prev_value) / Decimal::from(delta);

            self.filled_quantity = filled;
            self.avg_fill_price = Some(new_avg);
            Some(Fill { quantity: delta, price })
        } else {
            None
        };

        let status = match report.status {
            // A report without new quantity keeps a previous partial fill visible.
            OrderStatus::Pending if self.filled_quantity > 0 => OrderStatus::PartiallyFilled,
            OrderStatus::PartiallyFilled if self.filled_quantity >= self.intent.quantity => {
                OrderStatus::Filled
            }
            other => other,
        };
        if status != self.status || fill.is_some() {
            self.updated_at = now;
        }
        self.status = status;

        fill
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_buy(qty: u64, price: Decimal) -> OrderIntent {
        OrderIntent::limit("005930", Side::Buy, price, qty, IntentReason::Entry { level: 0 })
    }

    #[test]
    fn test_intent_constructors() {
        let intent = limit_buy(10, dec!(70000));
        assert_eq!(intent.kind, OrderKind::Limit);
        assert_eq!(intent.notional(), dec!(700000));
        assert!(intent.is_entry());

        let sell = OrderIntent::market("005930", Side::Sell, 5, IntentReason::FirstTakeProfit);
        assert_eq!(sell.price, None);
        assert_eq!(sell.notional(), Decimal::ZERO);
        assert!(!sell.is_entry());
        assert_ne!(intent.id, sell.id);
    }

    #[test]
    fn test_record_partial_then_full_fill() {
        let now = Utc::now();
        let mut record = OrderRecord::accepted(OrderId::new("A1"), limit_buy(10, dec!(100)), now);

        let fill = record
            .apply_report(&OrderStatusReport::partially_filled(4, dec!(100)), now)
            .unwrap();
        assert_eq!(fill, Fill { quantity: 4, price: dec!(100) });
        assert_eq!(record.status, OrderStatus::PartiallyFilled);
        assert_eq!(record.filled_quantity, 4);

        // Cumulative average 99.4 over 10 means the last 6 filled at 99
        let fill = record
            .apply_report(&OrderStatusReport::filled(10, dec!(99.4)), now)
            .unwrap();
        assert_eq!(fill.quantity, 6);
        assert_eq!(fill.price, dec!(99));
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.avg_fill_price, Some(dec!(99.4)));
    }

    #[test]
    fn test_record_ignores_stale_and_terminal_reports() {
        let now = Utc::now();
        let mut record = OrderRecord::accepted(OrderId::new("A2"), limit_buy(10, dec!(100)), now);

        record.apply_report(&OrderStatusReport::partially_filled(5, dec!(100)), now);
        // Stale report with less quantity
        assert!(record
            .apply_report(&OrderStatusReport::pending(), now)
            .is_none());
        assert_eq!(record.filled_quantity, 5);
        assert_eq!(record.status, OrderStatus::PartiallyFilled);

        record.apply_report(
            &OrderStatusReport {
                status: OrderStatus::Cancelled,
                filled_quantity: 5,
                avg_fill_price: Some(dec!(100)),
            },
            now,
        );
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert!(record
            .apply_report(&OrderStatusReport::filled(10, dec!(100)), now)
            .is_none());
        assert_eq!(record.filled_quantity, 5);
    }

    #[test]
    fn test_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Pending.is_active());
        assert!(OrderStatus::PartiallyFilled.is_active());
    }
}
