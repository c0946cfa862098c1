//! Per-symbol position state machine data.
//!
//! `SymbolPosition` only holds bookkeeping. Which transition happens when is
//! decided by the engine; the methods here keep the derived fields
//! (`average_entry_price`, `total_quantity`) consistent with the entry levels
//! and exit fills.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Fill, IntentId, OrderId, OrderStatus};

/// Lifecycle state of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    #[default]
    Flat,
    Entering,
    Holding,
    PartialExited,
    Exited,
}

impl PositionState {
    /// States in which exit rules apply.
    pub fn is_holding(&self) -> bool {
        matches!(self, PositionState::Holding | PositionState::PartialExited)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionState::Flat => "FLAT",
            PositionState::Entering => "ENTERING",
            PositionState::Holding => "HOLDING",
            PositionState::PartialExited => "PARTIAL_EXITED",
            PositionState::Exited => "EXITED",
        };
        write!(f, "{}", s)
    }
}

/// Profit-taking progress within one entry cycle. Ordered, never regresses
/// inside a cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RealizedStage {
    #[default]
    None,
    FirstSold,
    FullySold,
}

impl fmt::Display for RealizedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RealizedStage::None => "NONE",
            RealizedStage::FirstSold => "FIRST_SOLD",
            RealizedStage::FullySold => "FULLY_SOLD",
        };
        write!(f, "{}", s)
    }
}

/// One rung of the entry ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLevel {
    pub intent_id: IntentId,
    /// Assigned once the gateway accepts the order
    pub order_id: Option<OrderId>,
    pub price: Decimal,
    pub quantity: u64,
    pub filled_quantity: u64,
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
}

impl EntryLevel {
    pub fn new(intent_id: IntentId, price: Decimal, quantity: u64) -> Self {
        Self {
            intent_id,
            order_id: None,
            price,
            quantity,
            filled_quantity: 0,
            avg_fill_price: None,
            status: OrderStatus::Pending,
        }
    }

    fn filled_value(&self) -> Decimal {
        self.avg_fill_price.unwrap_or(self.price) * Decimal::from(self.filled_quantity)
    }

    /// Notional that may still execute.
    pub fn open_notional(&self) -> Decimal {
        if self.status.is_terminal() {
            return Decimal::ZERO;
        }
        self.price * Decimal::from(self.quantity.saturating_sub(self.filled_quantity))
    }
}

/// The single in-flight profit-taking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrder {
    pub intent_id: IntentId,
    pub order_id: Option<OrderId>,
    /// Stage reached once this order fills
    pub target: RealizedStage,
    pub quantity: u64,
    pub filled_quantity: u64,
}

/// Position bookkeeping for one traded symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPosition {
    pub symbol: String,
    pub state: PositionState,
    pub entry_orders: Vec<EntryLevel>,
    /// Weighted average of filled entry prices; `None` while nothing is filled
    pub average_entry_price: Option<Decimal>,
    /// Filled, unsold shares
    pub total_quantity: u64,
    pub realized_stage: RealizedStage,
    /// Shares sold in the current cycle
    pub sold_quantity: u64,
    /// Realized profit over all cycles
    pub realized_pnl: Decimal,
    pub last_price: Option<Decimal>,
    pub last_entry_fill_price: Option<Decimal>,
    pub exit_order: Option<ExitOrder>,
    pub cycle_started_at: Option<DateTime<Utc>>,
}

impl SymbolPosition {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: PositionState::Flat,
            entry_orders: Vec::new(),
            average_entry_price: None,
            total_quantity: 0,
            realized_stage: RealizedStage::None,
            sold_quantity: 0,
            realized_pnl: Decimal::ZERO,
            last_price: None,
            last_entry_fill_price: None,
            exit_order: None,
            cycle_started_at: None,
        }
    }

    /// Start a new entry cycle with the given ladder.
    pub fn begin_entry(&mut self, levels: Vec<EntryLevel>, now: DateTime<Utc>) {
        self.entry_orders = levels;
        self.state = PositionState::Entering;
        self.realized_stage = RealizedStage::None;
        self.sold_quantity = 0;
        self.average_entry_price = None;
        self.total_quantity = 0;
        self.last_entry_fill_price = None;
        self.exit_order = None;
        self.cycle_started_at = Some(now);
    }

    pub fn entry_level(&self, intent_id: IntentId) -> Option<&EntryLevel> {
        self.entry_orders.iter().find(|l| l.intent_id == intent_id)
    }

    fn entry_level_mut(&mut self, intent_id: IntentId) -> Option<&mut EntryLevel> {
        self.entry_orders.iter_mut().find(|l| l.intent_id == intent_id)
    }

    /// Record the gateway id of an accepted entry order.
    pub fn attach_entry_order(&mut self, intent_id: IntentId, order_id: OrderId) -> bool {
        match self.entry_level_mut(intent_id) {
            Some(level) => {
                level.order_id = Some(order_id);
                true
            }
            None => false,
        }
    }

    /// Remove a level whose placement definitively failed.
    pub fn drop_entry_level(&mut self, intent_id: IntentId) -> bool {
        let before = self.entry_orders.len();
        self.entry_orders.retain(|l| l.intent_id != intent_id);
        let removed = self.entry_orders.len() != before;
        if removed {
            self.recompute();
        }
        removed
    }

    /// Apply a new entry execution and recompute the derived fields.
    pub fn apply_entry_fill(&mut self, intent_id: IntentId, fill: &Fill) -> bool {
        let Some(level) = self.entry_level_mut(intent_id) else {
            return false;
        };
        let prev_value = level.filled_value();
        let filled = level.filled_quantity + fill.quantity;
        let value = prev_value + fill.price * Decimal::from(fill.quantity);
        level.filled_quantity = filled;
        level.avg_fill_price = Some(value / Decimal::from(filled));

        self.last_entry_fill_price = Some(fill.price);
        self.recompute();
        true
    }

    pub fn set_entry_status(&mut self, intent_id: IntentId, status: OrderStatus) -> bool {
        match self.entry_level_mut(intent_id) {
            Some(level) if !level.status.is_terminal() => {
                level.status = status;
                true
            }
            _ => false,
        }
    }

    /// All entry orders reached a terminal status.
    pub fn entry_complete(&self) -> bool {
        self.entry_orders.iter().all(|l| l.status.is_terminal())
    }

    pub fn open_entry_levels(&self) -> impl Iterator<Item = &EntryLevel> {
        self.entry_orders.iter().filter(|l| l.status.is_active())
    }

    /// Remaining notional of entry orders that may still fill.
    pub fn open_entry_notional(&self) -> Decimal {
        self.entry_orders.iter().map(EntryLevel::open_notional).sum()
    }

    /// Whether any order of this symbol is still unresolved.
    pub fn has_open_orders(&self) -> bool {
        self.open_entry_levels().next().is_some() || self.exit_order.is_some()
    }

    /// Track a freshly issued exit order.
    pub fn begin_exit(&mut self, intent_id: IntentId, target: RealizedStage, quantity: u64) {
        self.exit_order = Some(ExitOrder {
            intent_id,
            order_id: None,
            target,
            quantity,
            filled_quantity: 0,
        });
    }

    pub fn attach_exit_order(&mut self, intent_id: IntentId, order_id: OrderId) -> bool {
        match self.exit_order.as_mut() {
            Some(exit) if exit.intent_id == intent_id => {
                exit.order_id = Some(order_id);
                true
            }
            _ => false,
        }
    }

    /// Apply a sale and move the state to `PartialExited` or `Exited`.
    /// `FullySold` is only reached once nothing is left.
    pub fn apply_exit_fill(&mut self, intent_id: IntentId, fill: &Fill) -> bool {
        let target = match self.exit_order.as_mut() {
            Some(exit) if exit.intent_id == intent_id => {
                exit.filled_quantity += fill.quantity;
                exit.target
            }
            _ => return false,
        };

        let quantity = fill.quantity.min(self.total_quantity);
        if let Some(avg) = self.average_entry_price {
            self.realized_pnl += (fill.price - avg) * Decimal::from(quantity);
        }
        self.sold_quantity += quantity;
        self.recompute();

        if self.total_quantity == 0 {
            self.realized_stage = RealizedStage::FullySold;
            self.state = PositionState::Exited;
        } else {
            // A partially filled remainder sale leaves the second stage armed
            let reached = target.min(RealizedStage::FirstSold);
            self.realized_stage = self.realized_stage.max(reached);
            self.state = PositionState::PartialExited;
        }
        true
    }

    /// Forget the exit order once it is terminal. An exit that never executed
    /// leaves the stage untouched so the same stage can trigger again.
    pub fn finish_exit(&mut self, intent_id: IntentId) -> Option<ExitOrder> {
        match self.exit_order.as_ref() {
            Some(exit) if exit.intent_id == intent_id => self.exit_order.take(),
            _ => None,
        }
    }

    /// Close the cycle and return to `Flat`. The realized stage is kept until
    /// the next cycle begins.
    pub fn reset_flat(&mut self) {
        self.state = PositionState::Flat;
        self.entry_orders.clear();
        self.average_entry_price = None;
        self.total_quantity = 0;
        self.last_entry_fill_price = None;
        self.exit_order = None;
        self.cycle_started_at = None;
    }

    /// Return on `basis` at the last price, as a fraction.
    pub fn return_on(&self, basis: Decimal) -> Option<Decimal> {
        let price = self.last_price?;
        if basis <= Decimal::ZERO {
            return None;
        }
        Some((price - basis) / basis)
    }

    /// Unrealized profit at the last price.
    pub fn unrealized_pnl(&self) -> Decimal {
        match (self.last_price, self.average_entry_price) {
            (Some(price), Some(avg)) => (price - avg) * Decimal::from(self.total_quantity),
            _ => Decimal::ZERO,
        }
    }

    fn recompute(&mut self) {
        let filled: u64 = self.entry_orders.iter().map(|l| l.filled_quantity).sum();
        if filled == 0 {
            self.average_entry_price = None;
        } else {
            let value: Decimal = self.entry_orders.iter().map(EntryLevel::filled_value).sum();
            self.average_entry_price = Some(value / Decimal::from(filled));
        }
        self.total_quantity = filled.saturating_sub(self.sold_quantity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ladder(prices: &[Decimal], qty: u64) -> Vec<EntryLevel> {
        prices
            .iter()
            .map(|p| EntryLevel::new(IntentId::new(), *p, qty))
            .collect()
    }

    #[test]
    fn test_average_entry_from_fills() {
        let mut pos = SymbolPosition::new("005930");
        let prices = [dec!(100), dec!(99), dec!(98), dec!(97), dec!(96)];
        pos.begin_entry(ladder(&prices, 10), Utc::now());
        assert_eq!(pos.state, PositionState::Entering);
        assert_eq!(pos.average_entry_price, None);

        let ids: Vec<IntentId> = pos.entry_orders.iter().map(|l| l.intent_id).collect();
        for (id, price) in ids.iter().zip(prices) {
            pos.apply_entry_fill(*id, &Fill { quantity: 10, price });
            pos.set_entry_status(*id, OrderStatus::Filled);
        }

        assert_eq!(pos.average_entry_price, Some(dec!(98)));
        assert_eq!(pos.total_quantity, 50);
        assert!(pos.entry_complete());
        assert!(!pos.has_open_orders());
    }

    #[test]
    fn test_partial_fill_average() {
        let mut pos = SymbolPosition::new("005930");
        pos.begin_entry(ladder(&[dec!(100), dec!(90)], 10), Utc::now());
        let a = pos.entry_orders[0].intent_id;
        let b = pos.entry_orders[1].intent_id;

        pos.apply_entry_fill(a, &Fill { quantity: 5, price: dec!(100) });
        pos.apply_entry_fill(b, &Fill { quantity: 5, price: dec!(90) });

        assert_eq!(pos.average_entry_price, Some(dec!(95)));
        assert_eq!(pos.total_quantity, 10);
        assert_eq!(pos.open_entry_notional(), dec!(500) + dec!(450));
        assert_eq!(pos.last_entry_fill_price, Some(dec!(90)));
    }

    #[test]
    fn test_exit_stages() {
        let mut pos = SymbolPosition::new("005930");
        pos.begin_entry(ladder(&[dec!(100)], 10), Utc::now());
        let id = pos.entry_orders[0].intent_id;
        pos.apply_entry_fill(id, &Fill { quantity: 10, price: dec!(100) });
        pos.set_entry_status(id, OrderStatus::Filled);
        pos.state = PositionState::Holding;

        let first = IntentId::new();
        pos.begin_exit(first, RealizedStage::FirstSold, 5);
        assert!(pos.apply_exit_fill(first, &Fill { quantity: 5, price: dec!(102) }));
        assert_eq!(pos.state, PositionState::PartialExited);
        assert_eq!(pos.realized_stage, RealizedStage::FirstSold);
        assert_eq!(pos.total_quantity, 5);
        assert_eq!(pos.realized_pnl, dec!(10));
        // Average entry is unaffected by sales
        assert_eq!(pos.average_entry_price, Some(dec!(100)));
        assert!(pos.finish_exit(first).is_some());

        let second = IntentId::new();
        pos.begin_exit(second, RealizedStage::FullySold, 5);
        pos.apply_exit_fill(second, &Fill { quantity: 5, price: dec!(103) });
        assert_eq!(pos.state, PositionState::Exited);
        assert_eq!(pos.realized_stage, RealizedStage::FullySold);
        assert_eq!(pos.total_quantity, 0);
        assert_eq!(pos.realized_pnl, dec!(25));

        pos.finish_exit(second);
        pos.reset_flat();
        assert_eq!(pos.state, PositionState::Flat);
        assert_eq!(pos.average_entry_price, None);
        // Stage only resets when the next cycle begins
        assert_eq!(pos.realized_stage, RealizedStage::FullySold);
        pos.begin_entry(Vec::new(), Utc::now());
        assert_eq!(pos.realized_stage, RealizedStage::None);
    }

    #[test]
    fn test_single_share_first_exit_completes_cycle() {
        let mut pos = SymbolPosition::new("069500");
        pos.begin_entry(ladder(&[dec!(100)], 1), Utc::now());
        let id = pos.entry_orders[0].intent_id;
        pos.apply_entry_fill(id, &Fill { quantity: 1, price: dec!(100) });

        let exit = IntentId::new();
        pos.begin_exit(exit, RealizedStage::FirstSold, 1);
        pos.apply_exit_fill(exit, &Fill { quantity: 1, price: dec!(102) });

        assert_eq!(pos.realized_stage, RealizedStage::FullySold);
        assert_eq!(pos.state, PositionState::Exited);
    }

    #[test]
    fn test_partial_remainder_sale_keeps_second_stage() {
        let mut pos = SymbolPosition::new("005930");
        pos.begin_entry(ladder(&[dec!(100)], 10), Utc::now());
        let id = pos.entry_orders[0].intent_id;
        pos.apply_entry_fill(id, &Fill { quantity: 10, price: dec!(100) });
        pos.realized_stage = RealizedStage::FirstSold;

        let exit = IntentId::new();
        pos.begin_exit(exit, RealizedStage::FullySold, 10);
        pos.apply_exit_fill(exit, &Fill { quantity: 4, price: dec!(103) });
        pos.finish_exit(exit);

        assert_eq!(pos.realized_stage, RealizedStage::FirstSold);
        assert_eq!(pos.state, PositionState::PartialExited);
        assert_eq!(pos.total_quantity, 6);
    }

    #[test]
    fn test_drop_level_and_foreign_ids() {
        let mut pos = SymbolPosition::new("005930");
        pos.begin_entry(ladder(&[dec!(100), dec!(99)], 1), Utc::now());
        let id = pos.entry_orders[0].intent_id;

        assert!(pos.drop_entry_level(id));
        assert!(!pos.drop_entry_level(id));
        assert_eq!(pos.entry_orders.len(), 1);

        let stranger = IntentId::new();
        assert!(!pos.apply_entry_fill(stranger, &Fill { quantity: 1, price: dec!(1) }));
        assert!(!pos.apply_exit_fill(stranger, &Fill { quantity: 1, price: dec!(1) }));
        assert_eq!(pos.total_quantity, 0);
    }

    #[test]
    fn test_return_on_basis() {
        let mut pos = SymbolPosition::new("005930");
        assert_eq!(pos.return_on(dec!(100)), None);
        pos.last_price = Some(dec!(102));
        assert_eq!(pos.return_on(dec!(100)), Some(dec!(0.02)));
        assert_eq!(pos.return_on(Decimal::ZERO), None);
    }
}
