//! Distributed entry ladder planning.
//!
//! A plan is a list of distinct limit prices, highest first, each with a
//! non-zero share quantity.

use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use trading_core::types::Tick;

use crate::params::{EntrySizing, LevelSource, QuantitySplit, StrategyParams};

/// One planned limit buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderLevel {
    pub price: Decimal,
    pub quantity: u64,
}

/// The full entry plan for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPlan {
    pub levels: Vec<LadderLevel>,
}

impl EntryPlan {
    pub fn total_quantity(&self) -> u64 {
        self.levels.iter().map(|l| l.quantity).sum()
    }

    /// Cash needed if every level fills.
    pub fn notional(&self) -> Decimal {
        self.levels
            .iter()
            .map(|l| l.price * Decimal::from(l.quantity))
            .sum()
    }
}

/// Round `price` down to a multiple of `tick`.
pub fn floor_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).floor() * tick
}

/// Candidate prices, highest first, distinct and positive.
///
/// The order book source uses the bid ladder of `quote`. Without a book it
/// steps down one tick at a time from `reference`.
pub fn level_prices(
    params: &StrategyParams,
    quote: Option<&Tick>,
    reference: Decimal,
) -> Vec<Decimal> {
    let count = params.entry_price_levels;
    let tick = params.tick_size;

    let raw: Vec<Decimal> = match &params.level_source {
        LevelSource::OrderBook => match quote.filter(|q| !q.bid_levels.is_empty()) {
            Some(q) => q.bid_levels.iter().take(count).map(|l| l.price).collect(),
            None => {
                let top = floor_to_tick(reference, tick);
                (0..count).map(|i| top - tick * Decimal::from(i)).collect()
            }
        },
        LevelSource::FixedStep { step_pct } => (0..count)
            .map(|i| {
                let price = reference * (Decimal::ONE - *step_pct * Decimal::from(i));
                floor_to_tick(price, tick)
            })
            .collect(),
    };

    let mut prices: Vec<Decimal> = Vec::with_capacity(raw.len());
    for price in raw {
        if price > Decimal::ZERO && !prices.contains(&price) {
            prices.push(price);
        }
    }
    prices.sort_by(|a, b| b.cmp(a));
    prices
}

/// Total shares for the cycle.
pub fn total_quantity(sizing: &EntrySizing, reference: Decimal) -> u64 {
    match sizing {
        EntrySizing::Shares { quantity } => *quantity,
        EntrySizing::Notional { amount } => {
            if reference <= Decimal::ZERO {
                return 0;
            }
            (*amount / reference).floor().to_u64().unwrap_or(0)
        }
    }
}

/// Split `total` over `levels` levels. Leftover shares go to the highest
/// levels first.
pub fn split_quantity(total: u64, levels: usize, split: &QuantitySplit) -> Vec<u64> {
    if levels == 0 {
        return Vec::new();
    }

    let mut quantities = match split {
        QuantitySplit::Equal => vec![total / levels as u64; levels],
        QuantitySplit::Weighted { weights } => {
            let weights: Vec<u64> = (0..levels)
                .map(|i| weights.get(i).copied().unwrap_or(1) as u64)
                .collect();
            let sum: u64 = weights.iter().sum::<u64>().max(1);
            weights.iter().map(|w| total * w / sum).collect()
        }
    };

    let assigned: u64 = quantities.iter().sum();
    let leftover = total.saturating_sub(assigned);
    for i in 0..leftover {
        quantities[(i % levels as u64) as usize] += 1;
    }
    quantities
}

/// Build the entry plan, or `None` when nothing can be bought.
pub fn plan_entry(
    params: &StrategyParams,
    quote: Option<&Tick>,
    reference: Decimal,
) -> Option<EntryPlan> {
    let prices = level_prices(params, quote, reference);
    if prices.is_empty() {
        return None;
    }

    let sizing_price = prices.first().copied().unwrap_or(reference);
    let total = total_quantity(&params.sizing, sizing_price);
    if total == 0 {
        return None;
    }

    let quantities = split_quantity(total, prices.len(), &params.split);
    let levels: Vec<LadderLevel> = prices
        .into_iter()
        .zip(quantities)
        .filter(|(_, q)| *q > 0)
        .map(|(price, quantity)| LadderLevel { price, quantity })
        .collect();

    if levels.is_empty() {
        None
    } else {
        Some(EntryPlan { levels })
    }
}
