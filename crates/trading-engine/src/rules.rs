//! Entry and exit rules.
//!
//! Pure functions over the position and the latest indicator snapshot. They
//! decide whether an action is due, not how it is executed.

use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;
use trading_core::types::{PositionState, RealizedStage, SymbolPosition};
use trading_indicators::IndicatorSnapshot;

use crate::params::{ProfitBasis, StrategyParams};

/// Why an entry evaluation produced no intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntrySkip {
    NotFlat(PositionState),
    OpenOrders,
    OutsideSession,
    NoTrend,
    NotUptrend,
    NoMomentum,
    RsiAboveThreshold(f64),
}

impl fmt::Display for EntrySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySkip::NotFlat(state) => write!(f, "position is {}", state),
            EntrySkip::OpenOrders => write!(f, "orders still open"),
            EntrySkip::OutsideSession => write!(f, "outside trading session"),
            EntrySkip::NoTrend => write!(f, "daily history insufficient"),
            EntrySkip::NotUptrend => write!(f, "daily trend not up"),
            EntrySkip::NoMomentum => write!(f, "intraday history insufficient"),
            EntrySkip::RsiAboveThreshold(rsi) => write!(f, "RSI {:.2} above threshold", rsi),
        }
    }
}

/// Check the entry preconditions other than buying power.
pub fn evaluate_entry(
    params: &StrategyParams,
    position: &SymbolPosition,
    snapshot: &IndicatorSnapshot,
    at: DateTime<Utc>,
) -> Result<f64, EntrySkip> {
    if position.state != PositionState::Flat {
        return Err(EntrySkip::NotFlat(position.state));
    }
    if position.has_open_orders() {
        return Err(EntrySkip::OpenOrders);
    }
    if !params.session.contains(at) {
        return Err(EntrySkip::OutsideSession);
    }

    let trend = snapshot.trend.ok_or(EntrySkip::NoTrend)?;
    if !trend.is_uptrend(params.trend_requires_close_above_short_ma) {
        return Err(EntrySkip::NotUptrend);
    }

    let momentum = snapshot.momentum.ok_or(EntrySkip::NoMomentum)?;
    if momentum.rsi > params.rsi_entry_threshold {
        return Err(EntrySkip::RsiAboveThreshold(momentum.rsi));
    }

    Ok(momentum.rsi)
}

/// A due profit-taking sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    /// Stage reached when the sale fills
    pub target: RealizedStage,
    pub quantity: u64,
    /// Return that triggered the sale
    pub return_pct: Decimal,
}

/// Price the profit targets are measured against.
pub fn profit_basis(params: &StrategyParams, position: &SymbolPosition) -> Option<Decimal> {
    match params.profit_basis {
        ProfitBasis::AverageEntry => position.average_entry_price,
        ProfitBasis::LastFill => position
            .last_entry_fill_price
            .or(position.average_entry_price),
    }
}

/// Evaluate the two-stage exit. At most one stage fires per evaluation and
/// never while another order of the symbol is unresolved.
pub fn evaluate_exit(params: &StrategyParams, position: &SymbolPosition) -> Option<ExitSignal> {
    if !position.state.is_holding() || position.total_quantity == 0 {
        return None;
    }
    if position.has_open_orders() {
        return None;
    }

    let basis = profit_basis(params, position)?;
    let return_pct = position.return_on(basis)?;
    let total = position.total_quantity;

    match position.realized_stage {
        RealizedStage::None if return_pct >= params.first_profit_target => {
            let quantity = first_sell_quantity(total, params.first_sell_fraction);
            Some(ExitSignal {
                target: RealizedStage::FirstSold,
                quantity,
                return_pct,
            })
        }
        RealizedStage::FirstSold if return_pct >= params.second_profit_target => {
            Some(ExitSignal {
                target: RealizedStage::FullySold,
                quantity: total,
                return_pct,
            })
        }
        _ => None,
    }
}

/// `floor(total * fraction)`, or the whole lot when that floors to zero.
pub fn first_sell_quantity(total: u64, fraction: Decimal) -> u64 {
    let quantity = (Decimal::from(total) * fraction).floor();
    let quantity = quantity.to_u64().unwrap_or(0).min(total);
    if quantity == 0 {
        total
    } else {
        quantity
    }
}
