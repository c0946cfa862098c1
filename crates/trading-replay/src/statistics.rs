//! Replay statistics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trading_core::types::{IntentReason, Side};

/// One execution observed during the replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub reason: IntentReason,
    /// Profit against the average entry price, sells only
    pub pnl: Option<Decimal>,
}

/// Replay statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStats {
    pub initial_cash: Decimal,
    pub final_cash: Decimal,
    /// Cash plus holdings at the last marks
    pub final_equity: Decimal,
    pub total_return_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    /// Realized profit reported by the engine
    pub realized_pnl: Decimal,
    pub orders_placed: usize,
    pub orders_rejected: usize,
    pub entry_cycles: usize,
    pub first_take_profits: usize,
    pub second_take_profits: usize,
    pub bars_processed: usize,
    /// Bar end time and equity after each bar
    pub equity_curve: Vec<(i64, Decimal)>,
    pub trades: Vec<TradeRecord>,
    peak_equity: Decimal,
}

impl ReplayStats {
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            initial_cash,
            final_cash: initial_cash,
            final_equity: initial_cash,
            total_return_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            orders_placed: 0,
            orders_rejected: 0,
            entry_cycles: 0,
            first_take_profits: 0,
            second_take_profits: 0,
            bars_processed: 0,
            equity_curve: Vec::new(),
            trades: Vec::new(),
            peak_equity: initial_cash,
        }
    }

    /// Record equity after a bar.
    pub fn record_equity(&mut self, timestamp: i64, equity: Decimal) {
        self.equity_curve.push((timestamp, equity));

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > Decimal::ZERO {
            let drawdown = (self.peak_equity - equity) / self.peak_equity * dec!(100);
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }

        self.bars_processed += 1;
    }

    /// Count a placement outcome.
    pub fn record_placement(&mut self, reason: IntentReason, accepted: bool) {
        self.orders_placed += 1;
        if !accepted {
            self.orders_rejected += 1;
            return;
        }
        match reason {
            IntentReason::Entry { level: 0 } => self.entry_cycles += 1,
            IntentReason::Entry { .. } => {}
            IntentReason::FirstTakeProfit => self.first_take_profits += 1,
            IntentReason::SecondTakeProfit => self.second_take_profits += 1,
        }
    }

    pub fn add_trade(&mut self, trade: TradeRecord) {
        self.trades.push(trade);
    }

    /// Fix the final balances.
    pub fn finalize(&mut self, cash: Decimal, equity: Decimal, realized_pnl: Decimal) {
        self.final_cash = cash;
        self.final_equity = equity;
        self.realized_pnl = realized_pnl;
        if self.initial_cash > Decimal::ZERO {
            self.total_return_pct = (equity - self.initial_cash) / self.initial_cash * dec!(100);
        }
    }

    /// Sells with a positive profit.
    pub fn winning_sales(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.pnl.map_or(false, |p| p > Decimal::ZERO))
            .count()
    }

    /// Sells with a negative profit.
    pub fn losing_sales(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.pnl.map_or(false, |p| p < Decimal::ZERO))
            .count()
    }
}
