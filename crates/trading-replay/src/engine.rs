//! Replay engine.
//!
//! Feeds recorded bars through a [`TradingEngine`] and executes its actions
//! against a [`PaperGateway`], in a single task and in bar-end order. For
//! every intraday bar the paper broker is first marked at the bar's low,
//! high and close, so resting limit orders fill where the bar traded.

use chrono::{DateTime, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use trading_broker::PaperGateway;
use trading_core::traits::OrderGateway;
use trading_core::types::{BarEvent, MarketEvent, OrderId, OrderIntent, OrderStatusReport, Side};
use trading_engine::{EngineAction, EngineCommand, EngineEvent, TradingEngine};

use crate::report::ReplayReport;
use crate::statistics::{ReplayStats, TradeRecord};

/// Replay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub initial_cash: Decimal,
    /// Commission per share
    pub commission: Decimal,
    /// Slippage percentage applied to market orders
    pub slippage_pct: Decimal,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(10000000),
            commission: Decimal::ZERO,
            slippage_pct: dec!(0.05),
        }
    }
}

/// An accepted order and how much of it was already reported.
struct TrackedOrder {
    intent: OrderIntent,
    reported_quantity: u64,
    reported_value: Decimal,
}

/// Replay engine.
pub struct ReplayEngine {
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Run `events` (closed bars, ordered by bar end) through `engine`.
    pub async fn run(&self, engine: TradingEngine, events: Vec<BarEvent>) -> ReplayReport {
        let gateway = PaperGateway::new(self.config.initial_cash)
            .with_slippage(self.config.slippage_pct)
            .with_commission(self.config.commission);

        let mut session = Session {
            engine,
            gateway,
            stats: ReplayStats::new(self.config.initial_cash),
            orders: HashMap::new(),
        };

        let start = events
            .first()
            .map(bar_end)
            .unwrap_or(DateTime::UNIX_EPOCH);
        session.feed(EngineEvent::Control(EngineCommand::Start), start).await;
        session
            .feed(EngineEvent::BuyingPower(Ok(self.config.initial_cash)), start)
            .await;

        for event in events {
            let now = bar_end(&event);
            if event.timeframe.is_intraday() {
                for price in [event.bar.low, event.bar.high, event.bar.close] {
                    if let Some(price) = Decimal::from_f64(price) {
                        session.gateway.mark(&event.symbol, price);
                    }
                }
            }

            // Fills of the bar reach the engine before it sees the close
            session.feed(EngineEvent::Timer { now }, now).await;
            session
                .feed(EngineEvent::Market(MarketEvent::Bar(event)), now)
                .await;
            // Orders the close made marketable execute at once
            session.feed(EngineEvent::Timer { now }, now).await;

            let equity = session.gateway.equity();
            session.stats.record_equity(now.timestamp_millis(), equity);
        }

        let snapshot = session.engine.snapshot();
        let realized: Decimal = snapshot.positions.iter().map(|p| p.realized_pnl).sum();
        session
            .stats
            .finalize(session.gateway.cash(), session.gateway.equity(), realized);
        info!(
            "Replay finished: {} bars, {} orders, realized P&L {}",
            session.stats.bars_processed, session.stats.orders_placed, realized
        );

        ReplayReport {
            config: self.config.clone(),
            stats: session.stats,
            positions: snapshot.positions,
        }
    }
}

fn bar_end(event: &BarEvent) -> DateTime<Utc> {
    let end = event.timeframe.bar_end(event.bar.timestamp);
    DateTime::from_timestamp_millis(end).unwrap_or(DateTime::UNIX_EPOCH)
}

struct Session {
    engine: TradingEngine,
    gateway: PaperGateway,
    stats: ReplayStats,
    orders: HashMap<OrderId, TrackedOrder>,
}

impl Session {
    /// Handle `event` and every event its actions produce.
    async fn feed(&mut self, event: EngineEvent, now: DateTime<Utc>) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for action in self.engine.handle_at(event, now) {
                queue.push_back(self.execute(action, now).await);
            }
        }
    }

    async fn execute(&mut self, action: EngineAction, now: DateTime<Utc>) -> EngineEvent {
        match action {
            EngineAction::Place(intent) => {
                let result = self.gateway.place_order(&intent).await;
                self.stats.record_placement(intent.reason, result.is_ok());
                if let Ok(order_id) = &result {
                    self.orders.insert(
                        order_id.clone(),
                        TrackedOrder {
                            intent: intent.clone(),
                            reported_quantity: 0,
                            reported_value: Decimal::ZERO,
                        },
                    );
                }
                EngineEvent::Placement {
                    intent_id: intent.id,
                    result,
                }
            }
            EngineAction::LookupOrder(intent) => {
                let result = self.gateway.find_order(&intent).await;
                if let Ok(Some(order_id)) = &result {
                    self.orders
                        .entry(order_id.clone())
                        .or_insert_with(|| TrackedOrder {
                            intent: intent.clone(),
                            reported_quantity: 0,
                            reported_value: Decimal::ZERO,
                        });
                }
                EngineEvent::OrderLookup {
                    intent_id: intent.id,
                    result,
                }
            }
            EngineAction::PollStatus { order_id } => {
                let result = self.gateway.get_order_status(&order_id).await;
                if let Ok(report) = &result {
                    self.record_fill(&order_id, report, now);
                }
                EngineEvent::OrderUpdate { order_id, result }
            }
            EngineAction::Cancel { order_id } => {
                let result = self.gateway.cancel_order(&order_id).await;
                EngineEvent::CancelResult { order_id, result }
            }
            EngineAction::RefreshBuyingPower => {
                EngineEvent::BuyingPower(self.gateway.get_buying_power().await)
            }
        }
    }

    /// Turn growth of the cumulative fill into a trade record.
    fn record_fill(&mut self, order_id: &OrderId, report: &OrderStatusReport, now: DateTime<Utc>) {
        let Some(order) = self.orders.get_mut(order_id) else {
            return;
        };
        let Some(avg) = report.avg_fill_price else {
            return;
        };
        if report.filled_quantity <= order.reported_quantity {
            return;
        }

        let quantity = report.filled_quantity - order.reported_quantity;
        let value = avg * Decimal::from(report.filled_quantity) - order.reported_value;
        let price = value / Decimal::from(quantity);
        order.reported_quantity = report.filled_quantity;
        order.reported_value += value;

        let intent = &order.intent;
        // The engine has not applied this fill yet, so the average is the pre-sale one
        let pnl = match intent.side {
            Side::Buy => None,
            Side::Sell => self
                .engine
                .position(&intent.symbol)
                .and_then(|p| p.average_entry_price)
                .map(|entry| (price - entry) * Decimal::from(quantity)),
        };
        debug!(
            "Replay fill: {} {} {} @ {} ({})",
            intent.side, quantity, intent.symbol, price, intent.reason
        );
        self.stats.add_trade(TradeRecord {
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity,
            price,
            timestamp: now,
            reason: intent.reason,
            pnl,
        });
    }
}
