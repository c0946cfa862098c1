//! The trading engine.
//!
//! `TradingEngine` is a synchronous state machine. Every input arrives as an
//! [`EngineEvent`] and every side effect leaves as an [`EngineAction`]; the
//! caller executes actions against the gateway and feeds the outcomes back as
//! events. All state for all symbols is mutated from this single entry point.

use chrono::{DateTime, Duration, Utc};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};
use trading_core::error::{GatewayError, TradingResult};
use trading_core::traits::StrategyConfig;
use trading_core::types::{
    Bar, BarEvent, BarSeries, EntryLevel, IntentId, IntentReason, MarketEvent, OrderId,
    OrderIntent, OrderRecord, OrderStatusReport, PositionState, RealizedStage, Side,
    SymbolPosition, Tick, Timeframe,
};
use trading_indicators::{IndicatorEngine, IndicatorSnapshot};

use crate::ladder;
use crate::params::{ExitPricing, StrategyParams};
use crate::rules;
use crate::snapshot::{EngineSnapshot, RecentOrders};

/// Timeframe whose closed bars drive entry decisions.
pub const SIGNAL_TIMEFRAME: Timeframe = Timeframe::Minute10;

/// Runtime settings of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub symbols: Vec<String>,
    /// A placement slower than this is reported overdue
    pub order_deadline_ms: u64,
    /// Period of the timer driving status polls
    pub poll_interval_ms: u64,
    pub recent_orders_capacity: usize,
    pub cancel_open_orders_on_stop: bool,
    /// How long shutdown waits for cancels and placements to resolve
    pub shutdown_grace_ms: u64,
    pub daily_history_bars: usize,
    pub intraday_history_bars: usize,
    pub buying_power_refresh_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            order_deadline_ms: 5000,
            poll_interval_ms: 2000,
            recent_orders_capacity: 100,
            cancel_open_orders_on_stop: true,
            shutdown_grace_ms: 10_000,
            daily_history_bars: 30,
            intraday_history_bars: 50,
            buying_power_refresh_secs: 60,
        }
    }
}

/// Presentation commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    Start,
    Stop,
}

/// Input of the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Market(MarketEvent),
    /// Closed bars loaded at startup, oldest first
    History {
        symbol: String,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    },
    /// Outcome of a `Place` action
    Placement {
        intent_id: IntentId,
        result: Result<OrderId, GatewayError>,
    },
    /// A `Place` action exceeded its deadline and is still running
    PlacementOverdue { intent_id: IntentId },
    /// Outcome of a `LookupOrder` action
    OrderLookup {
        intent_id: IntentId,
        result: Result<Option<OrderId>, GatewayError>,
    },
    /// Outcome of a `PollStatus` action
    OrderUpdate {
        order_id: OrderId,
        result: Result<OrderStatusReport, GatewayError>,
    },
    /// Outcome of a `Cancel` action
    CancelResult {
        order_id: OrderId,
        result: Result<bool, GatewayError>,
    },
    /// Outcome of a `RefreshBuyingPower` action
    BuyingPower(Result<Decimal, GatewayError>),
    Timer { now: DateTime<Utc> },
    Control(EngineCommand),
}

/// Output of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Place(OrderIntent),
    /// Ask the broker which order, if any, it created for an intent whose
    /// placement ended without a definite answer
    LookupOrder(OrderIntent),
    Cancel { order_id: OrderId },
    PollStatus { order_id: OrderId },
    RefreshBuyingPower,
}

struct SymbolState {
    position: SymbolPosition,
    daily: BarSeries,
    intraday: BarSeries,
    indicators: IndicatorSnapshot,
    last_quote: Option<Tick>,
}

struct PendingPlacement {
    intent: OrderIntent,
    overdue: bool,
    /// The placement failed in a way that may still have created the order
    unresolved: bool,
    lookup_in_flight: bool,
}

/// The per-symbol decision and execution state machine.
pub struct TradingEngine {
    params: StrategyParams,
    settings: EngineSettings,
    indicators: IndicatorEngine,
    symbols: BTreeMap<String, SymbolState>,
    open_orders: BTreeMap<OrderId, OrderRecord>,
    pending: HashMap<IntentId, PendingPlacement>,
    cancel_requested: HashSet<OrderId>,
    cancel_on_accept: HashSet<IntentId>,
    recent: RecentOrders,
    buying_power: Option<Decimal>,
    buying_power_stale: bool,
    buying_power_in_flight: bool,
    buying_power_requested_at: Option<DateTime<Utc>>,
    running: bool,
    clock: Option<DateTime<Utc>>,
}

impl TradingEngine {
    /// Create a stopped engine for the configured symbols.
    pub fn new(params: StrategyParams, settings: EngineSettings) -> TradingResult<Self> {
        params.validate()?;
        let indicators = IndicatorEngine::new(
            params.short_ma_period,
            params.long_ma_period,
            params.rsi_period,
        )?;

        let daily_capacity = settings.daily_history_bars.max(params.long_ma_period);
        let intraday_capacity = settings.intraday_history_bars.max(params.rsi_period + 1);
        let symbols = settings
            .symbols
            .iter()
            .map(|symbol| {
                let state = SymbolState {
                    position: SymbolPosition::new(symbol.clone()),
                    daily: BarSeries::with_capacity(symbol.clone(), Timeframe::Daily, daily_capacity),
                    intraday: BarSeries::with_capacity(
                        symbol.clone(),
                        SIGNAL_TIMEFRAME,
                        intraday_capacity,
                    ),
                    indicators: IndicatorSnapshot::default(),
                    last_quote: None,
                };
                (symbol.clone(), state)
            })
            .collect();

        Ok(Self {
            recent: RecentOrders::new(settings.recent_orders_capacity),
            params,
            settings,
            indicators,
            symbols,
            open_orders: BTreeMap::new(),
            pending: HashMap::new(),
            cancel_requested: HashSet::new(),
            cancel_on_accept: HashSet::new(),
            buying_power: None,
            buying_power_stale: false,
            buying_power_in_flight: false,
            buying_power_requested_at: None,
            running: false,
            clock: None,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn position(&self, symbol: &str) -> Option<&SymbolPosition> {
        self.symbols.get(symbol).map(|s| &s.position)
    }

    pub fn open_orders(&self) -> impl Iterator<Item = &OrderRecord> {
        self.open_orders.values()
    }

    pub fn pending_placements(&self) -> usize {
        self.pending.len()
    }

    /// Last buying power snapshot minus the notional of open buy orders.
    pub fn available_buying_power(&self) -> Option<Decimal> {
        let reserved: Decimal = self
            .symbols
            .values()
            .map(|s| s.position.open_entry_notional())
            .sum();
        self.buying_power
            .map(|bp| (bp - reserved).max(Decimal::ZERO))
    }

    /// Handle an event at the current wall-clock time.
    pub fn handle(&mut self, event: EngineEvent) -> Vec<EngineAction> {
        self.handle_at(event, Utc::now())
    }

    /// Handle an event at `now`.
    pub fn handle_at(&mut self, event: EngineEvent, now: DateTime<Utc>) -> Vec<EngineAction> {
        self.clock = Some(now);
        let mut actions = Vec::new();

        match event {
            EngineEvent::Market(MarketEvent::Tick(tick)) => self.on_tick(tick, now, &mut actions),
            EngineEvent::Market(MarketEvent::Bar(bar)) => self.on_bar(bar, now, &mut actions),
            EngineEvent::Market(MarketEvent::Connected) => info!("Market data connected"),
            EngineEvent::Market(MarketEvent::Disconnected { reason }) => {
                warn!("Market data disconnected: {}", reason)
            }
            EngineEvent::History {
                symbol,
                timeframe,
                bars,
            } => self.on_history(&symbol, timeframe, bars),
            EngineEvent::Placement { intent_id, result } => {
                self.on_placement(intent_id, result, now, &mut actions)
            }
            EngineEvent::PlacementOverdue { intent_id } => self.on_placement_overdue(intent_id),
            EngineEvent::OrderLookup { intent_id, result } => {
                self.on_order_lookup(intent_id, result, now, &mut actions)
            }
            EngineEvent::OrderUpdate { order_id, result } => {
                self.on_order_update(order_id, result, now)
            }
            EngineEvent::CancelResult { order_id, result } => {
                self.on_cancel_result(order_id, result, &mut actions)
            }
            EngineEvent::BuyingPower(result) => self.on_buying_power(result),
            EngineEvent::Timer { now } => self.on_timer(now, &mut actions),
            EngineEvent::Control(command) => self.on_command(command, now, &mut actions),
        }

        actions
    }

    /// Read-only view for presentation.
    pub fn snapshot(&self) -> EngineSnapshot {
        let mut recent_orders: Vec<OrderRecord> = self
            .open_orders
            .values()
            .chain(self.recent.iter())
            .cloned()
            .collect();
        recent_orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent_orders.truncate(self.settings.recent_orders_capacity);

        EngineSnapshot {
            running: self.running,
            positions: self.symbols.values().map(|s| s.position.clone()).collect(),
            indicators: self
                .symbols
                .iter()
                .map(|(symbol, s)| (symbol.clone(), s.indicators))
                .collect(),
            recent_orders,
            buying_power: self.buying_power,
            available_buying_power: self.available_buying_power(),
            updated_at: self.clock,
        }
    }

    fn on_tick(&mut self, tick: Tick, now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        let Some(state) = self.symbols.get_mut(&tick.symbol) else {
            debug!("Ignoring tick for unsubscribed symbol {}", tick.symbol);
            return;
        };
        state.position.last_price = Some(tick.price);
        let symbol = tick.symbol.clone();
        state.last_quote = Some(tick);

        self.try_exit(&symbol, now, actions);
    }

    fn on_bar(&mut self, event: BarEvent, now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        if !event.is_closed {
            return;
        }
        let Some(state) = self.symbols.get_mut(&event.symbol) else {
            debug!("Ignoring bar for unsubscribed symbol {}", event.symbol);
            return;
        };

        let changed = match event.timeframe {
            Timeframe::Daily => state.daily.upsert(event.bar),
            SIGNAL_TIMEFRAME => state.intraday.upsert(event.bar),
            other => {
                debug!("Ignoring {} bar for {}", other, event.symbol);
                return;
            }
        };
        // Re-delivered or stale bars never trigger a second decision
        if !changed {
            return;
        }

        let bar_end = event.timeframe.bar_end(event.bar.timestamp);
        let quote_is_older = state
            .last_quote
            .as_ref()
            .map_or(true, |q| q.timestamp.timestamp_millis() < bar_end);
        if quote_is_older {
            if let Some(close) = Decimal::from_f64(event.bar.close) {
                state.position.last_price = Some(close);
            }
        }

        let symbol = event.symbol;
        self.refresh_indicators(&symbol);
        self.close_cycle_if_done(&symbol);

        if event.timeframe == SIGNAL_TIMEFRAME {
            let decided_at = DateTime::from_timestamp_millis(bar_end).unwrap_or(now);
            self.try_enter(&symbol, decided_at, now, actions);
        }
        self.try_exit(&symbol, now, actions);
    }

    fn on_history(&mut self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let Some(state) = self.symbols.get_mut(symbol) else {
            return;
        };
        let count = bars.len();
        let last_close = bars.last().map(|b| b.close);
        match timeframe {
            Timeframe::Daily => state.daily.extend(bars),
            SIGNAL_TIMEFRAME => state.intraday.extend(bars),
            other => {
                debug!("Ignoring {} history for {}", other, symbol);
                return;
            }
        }
        if state.position.last_price.is_none() {
            state.position.last_price = last_close.and_then(Decimal::from_f64);
        }
        info!("Loaded {} {} bars for {}", count, timeframe, symbol);
        self.refresh_indicators(symbol);
    }

    fn refresh_indicators(&mut self, symbol: &str) {
        let engine = &self.indicators;
        let Some(state) = self.symbols.get_mut(symbol) else {
            return;
        };

        state.indicators.trend = match engine.trend(&state.daily) {
            Ok(trend) => Some(trend),
            Err(e) => {
                debug!("Trend unavailable for {}: {}", symbol, e);
                None
            }
        };
        state.indicators.momentum = match engine.momentum(&state.intraday) {
            Ok(momentum) => Some(momentum),
            Err(e) => {
                debug!("Momentum unavailable for {}: {}", symbol, e);
                None
            }
        };
    }

    fn try_enter(
        &mut self,
        symbol: &str,
        decided_at: DateTime<Utc>,
        now: DateTime<Utc>,
        actions: &mut Vec<EngineAction>,
    ) {
        if !self.running {
            return;
        }
        let available = self.available_buying_power();
        let Some(state) = self.symbols.get(symbol) else {
            return;
        };

        let rsi = match rules::evaluate_entry(
            &self.params,
            &state.position,
            &state.indicators,
            decided_at,
        ) {
            Ok(rsi) => rsi,
            Err(skip) => {
                debug!(symbol = %symbol, "Entry skipped: {}", skip);
                return;
            }
        };

        let quote = state.last_quote.as_ref();
        let reference = quote
            .and_then(Tick::best_bid)
            .or(state.position.last_price);
        let Some(reference) = reference else {
            debug!(symbol = %symbol, "Entry skipped: no price");
            return;
        };
        let Some(plan) = ladder::plan_entry(&self.params, quote, reference) else {
            warn!(symbol = %symbol, "Entry skipped: no valid price levels at {}", reference);
            return;
        };

        let required = plan.notional();
        let Some(available) = available else {
            warn!(symbol = %symbol, "Entry skipped: buying power unknown");
            self.request_buying_power(now, actions);
            return;
        };
        if required > available {
            info!(
                symbol = %symbol,
                "Entry skipped: needs {} but only {} available", required, available
            );
            return;
        }

        let intents: Vec<OrderIntent> = plan
            .levels
            .iter()
            .enumerate()
            .map(|(level, l)| {
                OrderIntent::limit(
                    symbol,
                    Side::Buy,
                    l.price,
                    l.quantity,
                    IntentReason::Entry { level },
                )
            })
            .collect();
        let levels = intents
            .iter()
            .zip(&plan.levels)
            .map(|(intent, l)| EntryLevel::new(intent.id, l.price, l.quantity))
            .collect();

        if let Some(state) = self.symbols.get_mut(symbol) {
            state.position.begin_entry(levels, now);
        }
        info!(
            symbol = %symbol,
            rsi = rsi,
            "FLAT -> ENTERING: {} shares over {} levels from {}",
            plan.total_quantity(),
            plan.levels.len(),
            reference
        );

        for intent in intents {
            self.issue(intent, actions);
        }
    }

    fn try_exit(&mut self, symbol: &str, _now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        if !self.running {
            return;
        }
        let Some(state) = self.symbols.get(symbol) else {
            return;
        };
        let Some(signal) = rules::evaluate_exit(&self.params, &state.position) else {
            return;
        };

        let reason = match signal.target {
            RealizedStage::FirstSold => IntentReason::FirstTakeProfit,
            _ => IntentReason::SecondTakeProfit,
        };
        let best_bid = state.last_quote.as_ref().and_then(Tick::best_bid);
        let intent = match (self.params.exit_pricing, best_bid) {
            (ExitPricing::BestBid, Some(bid)) => {
                OrderIntent::limit(symbol, Side::Sell, bid, signal.quantity, reason)
            }
            _ => OrderIntent::market(symbol, Side::Sell, signal.quantity, reason),
        };

        info!(
            symbol = %symbol,
            "{} triggered at {:.2}% return: selling {} of {}",
            reason,
            signal.return_pct * Decimal::ONE_HUNDRED,
            signal.quantity,
            state.position.total_quantity
        );

        if let Some(state) = self.symbols.get_mut(symbol) {
            state
                .position
                .begin_exit(intent.id, signal.target, signal.quantity);
        }
        self.issue(intent, actions);
    }

    fn issue(&mut self, intent: OrderIntent, actions: &mut Vec<EngineAction>) {
        self.pending.insert(
            intent.id,
            PendingPlacement {
                intent: intent.clone(),
                overdue: false,
                unresolved: false,
                lookup_in_flight: false,
            },
        );
        actions.push(EngineAction::Place(intent));
    }

    fn on_placement(
        &mut self,
        intent_id: IntentId,
        result: Result<OrderId, GatewayError>,
        now: DateTime<Utc>,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some(mut pending) = self.pending.remove(&intent_id) else {
            warn!("Placement result for unknown intent {}", intent_id);
            return;
        };

        match result {
            Ok(order_id) => self.accept(pending, order_id, now, actions),
            Err(err) if err.outcome_unknown() => {
                warn!(
                    symbol = %pending.intent.symbol,
                    "Placement outcome unknown for {} {} ({}): {}, looking the order up",
                    pending.intent.side, pending.intent.quantity, pending.intent.reason, err
                );
                pending.unresolved = true;
                pending.lookup_in_flight = true;
                actions.push(EngineAction::LookupOrder(pending.intent.clone()));
                self.pending.insert(intent_id, pending);
            }
            Err(err) => {
                let intent = pending.intent;
                warn!(
                    symbol = %intent.symbol,
                    "Placement failed for {} {} ({}): {}",
                    intent.side, intent.quantity, intent.reason, err
                );
                self.cancel_on_accept.remove(&intent_id);
                self.rollback(&intent);
            }
        }
    }

    /// Track the order the gateway created for a pending intent.
    fn accept(
        &mut self,
        pending: PendingPlacement,
        order_id: OrderId,
        now: DateTime<Utc>,
        actions: &mut Vec<EngineAction>,
    ) {
        let intent = pending.intent;
        let intent_id = intent.id;
        let symbol = intent.symbol.clone();

        if let Some(state) = self.symbols.get_mut(&symbol) {
            let attached = if intent.is_entry() {
                state.position.attach_entry_order(intent_id, order_id.clone())
            } else {
                state.position.attach_exit_order(intent_id, order_id.clone())
            };
            if !attached {
                warn!(symbol = %symbol, "Order {} accepted for an intent no longer tracked", order_id);
            }
        }
        info!(
            symbol = %symbol,
            "Order accepted: {} {} {} @ {:?} ({})",
            order_id, intent.side, intent.quantity, intent.price, intent.reason
        );

        let mut record = OrderRecord::accepted(order_id.clone(), intent, now);
        record.overdue = pending.overdue || pending.unresolved;
        self.open_orders.insert(order_id.clone(), record);

        if self.cancel_on_accept.remove(&intent_id) {
            self.request_cancel(order_id, actions);
        }
    }

    fn on_order_lookup(
        &mut self,
        intent_id: IntentId,
        result: Result<Option<OrderId>, GatewayError>,
        now: DateTime<Utc>,
        actions: &mut Vec<EngineAction>,
    ) {
        match self.pending.get_mut(&intent_id) {
            Some(pending) if pending.unresolved => pending.lookup_in_flight = false,
            _ => {
                debug!("Lookup result for unknown intent {}", intent_id);
                return;
            }
        }

        match result {
            Ok(Some(order_id)) => {
                if let Some(pending) = self.pending.remove(&intent_id) {
                    self.accept(pending, order_id, now, actions);
                }
            }
            Ok(None) => {
                if let Some(pending) = self.pending.remove(&intent_id) {
                    info!(
                        symbol = %pending.intent.symbol,
                        "No order exists for {}, releasing it", pending.intent.reason
                    );
                    self.cancel_on_accept.remove(&intent_id);
                    self.rollback(&pending.intent);
                }
            }
            Err(err) => debug!("Lookup of intent {} failed: {}, retrying", intent_id, err),
        }
    }

    /// Forget an intent whose placement failed and re-arm the state it left.
    fn rollback(&mut self, intent: &OrderIntent) {
        let Some(state) = self.symbols.get_mut(&intent.symbol) else {
            return;
        };
        if intent.is_entry() {
            state.position.drop_entry_level(intent.id);
            self.settle_entry(&intent.symbol);
        } else if state.position.finish_exit(intent.id).is_some() {
            debug!(
                "Exit for {} rolled back, stage stays {}",
                intent.symbol, state.position.realized_stage
            );
        }
    }

    fn on_placement_overdue(&mut self, intent_id: IntentId) {
        if let Some(pending) = self.pending.get_mut(&intent_id) {
            pending.overdue = true;
            warn!(
                symbol = %pending.intent.symbol,
                "Placement of {} exceeded its deadline, order stays pending",
                pending.intent.reason
            );
        }
    }

    fn on_order_update(
        &mut self,
        order_id: OrderId,
        result: Result<OrderStatusReport, GatewayError>,
        now: DateTime<Utc>,
    ) {
        let report = match result {
            Ok(report) => report,
            Err(err) if err.is_auth() => {
                warn!("Status query for {} failed: {}", order_id, err);
                return;
            }
            Err(err) => {
                debug!("Status query for {} failed: {}", order_id, err);
                return;
            }
        };
        let Some(record) = self.open_orders.get_mut(&order_id) else {
            debug!("Status for untracked order {}", order_id);
            return;
        };

        let fill = record.apply_report(&report, now);
        let status = record.status;
        let intent = record.intent.clone();

        if let Some(state) = self.symbols.get_mut(&intent.symbol) {
            let position = &mut state.position;
            if intent.is_entry() {
                if let Some(fill) = &fill {
                    position.apply_entry_fill(intent.id, fill);
                    info!(
                        symbol = %intent.symbol,
                        "Entry fill: {} @ {}, holding {} avg {:?}",
                        fill.quantity, fill.price, position.total_quantity, position.average_entry_price
                    );
                }
                position.set_entry_status(intent.id, status);
            } else {
                if let Some(fill) = &fill {
                    let before = position.state;
                    position.apply_exit_fill(intent.id, fill);
                    info!(
                        symbol = %intent.symbol,
                        "Exit fill: {} @ {}, {} -> {} ({}), {} left",
                        fill.quantity,
                        fill.price,
                        before,
                        position.state,
                        position.realized_stage,
                        position.total_quantity
                    );
                }
                if status.is_terminal() {
                    if let Some(exit) = position.finish_exit(intent.id) {
                        if exit.filled_quantity == 0 {
                            info!(
                                symbol = %intent.symbol,
                                "Exit order {} ended {} unfilled, stage {} re-armed",
                                order_id, status, position.realized_stage
                            );
                        }
                    }
                }
            }
        }

        if fill.is_some() {
            self.buying_power_stale = true;
        }
        if status.is_terminal() {
            if let Some(record) = self.open_orders.remove(&order_id) {
                self.recent.push(record);
            }
            self.cancel_requested.remove(&order_id);
        }
        if intent.is_entry() {
            self.settle_entry(&intent.symbol);
        } else if status.is_terminal() {
            self.close_cycle_if_done(&intent.symbol);
        }
    }

    /// `ENTERING` ends once every entry order is terminal.
    fn settle_entry(&mut self, symbol: &str) {
        let Some(state) = self.symbols.get_mut(symbol) else {
            return;
        };
        let position = &mut state.position;
        if position.state != PositionState::Entering || !position.entry_complete() {
            return;
        }

        if position.total_quantity > 0 {
            position.state = PositionState::Holding;
            info!(
                symbol = %symbol,
                "ENTERING -> HOLDING: {} shares avg {:?}",
                position.total_quantity, position.average_entry_price
            );
        } else {
            position.reset_flat();
            info!(symbol = %symbol, "ENTERING -> FLAT: no entry order filled");
        }
    }

    /// `EXITED` returns to `FLAT` once nothing is open.
    fn close_cycle_if_done(&mut self, symbol: &str) {
        let Some(state) = self.symbols.get_mut(symbol) else {
            return;
        };
        let position = &mut state.position;
        if position.state == PositionState::Exited && !position.has_open_orders() {
            position.reset_flat();
            info!(
                symbol = %symbol,
                "EXITED -> FLAT, realized P&L {}", position.realized_pnl
            );
        }
    }

    fn on_cancel_result(
        &mut self,
        order_id: OrderId,
        result: Result<bool, GatewayError>,
        actions: &mut Vec<EngineAction>,
    ) {
        match result {
            Ok(true) => {
                debug!("Cancel accepted for {}", order_id);
                if self.open_orders.contains_key(&order_id) {
                    actions.push(EngineAction::PollStatus { order_id });
                }
            }
            Ok(false) => {
                warn!("Cancel refused for {}", order_id);
                self.cancel_requested.remove(&order_id);
                if self.open_orders.contains_key(&order_id) {
                    actions.push(EngineAction::PollStatus { order_id });
                }
            }
            Err(err) => {
                warn!("Cancel failed for {}: {}", order_id, err);
                self.cancel_requested.remove(&order_id);
            }
        }
    }

    fn on_buying_power(&mut self, result: Result<Decimal, GatewayError>) {
        self.buying_power_in_flight = false;
        match result {
            Ok(value) => {
                debug!("Buying power: {}", value);
                self.buying_power = Some(value);
                self.buying_power_stale = false;
            }
            Err(err) => warn!("Buying power refresh failed: {}", err),
        }
    }

    fn on_timer(&mut self, now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        for order_id in self.open_orders.keys() {
            actions.push(EngineAction::PollStatus {
                order_id: order_id.clone(),
            });
        }

        for pending in self.pending.values_mut() {
            if pending.unresolved && !pending.lookup_in_flight {
                pending.lookup_in_flight = true;
                actions.push(EngineAction::LookupOrder(pending.intent.clone()));
            }
        }

        self.expire_entries(now, actions);

        let symbols: Vec<String> = self.symbols.keys().cloned().collect();
        for symbol in &symbols {
            self.close_cycle_if_done(symbol);
        }

        let refresh_due = self.buying_power.is_none()
            || self.buying_power_stale
            || self.buying_power_requested_at.map_or(true, |at| {
                now - at >= Duration::seconds(self.settings.buying_power_refresh_secs as i64)
            });
        if refresh_due {
            self.request_buying_power(now, actions);
        }
    }

    /// Cancel entry orders that outlived the entry TTL.
    fn expire_entries(&mut self, now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        let ttl = self.params.entry_order_ttl_secs;
        if ttl == 0 {
            return;
        }
        let ttl = Duration::seconds(ttl as i64);

        let mut cancels = Vec::new();
        let mut awaiting = Vec::new();
        for state in self.symbols.values() {
            let position = &state.position;
            let expired = position.state == PositionState::Entering
                && position.cycle_started_at.map_or(false, |t| now - t >= ttl);
            if !expired {
                continue;
            }
            for level in position.open_entry_levels() {
                match &level.order_id {
                    Some(order_id) => cancels.push(order_id.clone()),
                    None => awaiting.push(level.intent_id),
                }
            }
        }

        for order_id in cancels {
            if !self.cancel_requested.contains(&order_id) {
                info!("Entry order {} expired, cancelling", order_id);
            }
            self.request_cancel(order_id, actions);
        }
        for intent_id in awaiting {
            if self.pending.contains_key(&intent_id) {
                self.cancel_on_accept.insert(intent_id);
            }
        }
    }

    fn on_command(
        &mut self,
        command: EngineCommand,
        now: DateTime<Utc>,
        actions: &mut Vec<EngineAction>,
    ) {
        match command {
            EngineCommand::Start => {
                if self.running {
                    return;
                }
                self.running = true;
                self.cancel_on_accept.clear();
                info!("Engine started for {} symbols", self.symbols.len());
                self.request_buying_power(now, actions);
            }
            EngineCommand::Stop => {
                if !self.running {
                    return;
                }
                self.running = false;
                info!("Engine stopped, no new orders will be issued");

                if self.settings.cancel_open_orders_on_stop {
                    let open: Vec<OrderId> = self.open_orders.keys().cloned().collect();
                    for order_id in open {
                        self.request_cancel(order_id, actions);
                    }
                    self.cancel_on_accept.extend(self.pending.keys().copied());
                }
            }
        }
    }

    fn request_cancel(&mut self, order_id: OrderId, actions: &mut Vec<EngineAction>) {
        if self.cancel_requested.insert(order_id.clone()) {
            actions.push(EngineAction::Cancel { order_id });
        }
    }

    fn request_buying_power(&mut self, now: DateTime<Utc>, actions: &mut Vec<EngineAction>) {
        if self.buying_power_in_flight {
            return;
        }
        self.buying_power_in_flight = true;
        self.buying_power_requested_at = Some(now);
        actions.push(EngineAction::RefreshBuyingPower);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use trading_core::types::{BookLevel, OrderStatus};

    const SYMBOL: &str = "005930";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()
    }

    fn params() -> StrategyParams {
        StrategyParams {
            sizing: crate::params::EntrySizing::Shares { quantity: 50 },
            ..Default::default()
        }
    }

    fn engine_with(params: StrategyParams) -> TradingEngine {
        let settings = EngineSettings {
            symbols: vec![SYMBOL.to_string()],
            ..Default::default()
        };
        let mut engine = TradingEngine::new(params, settings).unwrap();
        let start = t0() - Duration::days(60);

        // Rising daily closes: short MA above long MA
        let daily: Vec<Bar> = (0..30)
            .map(|i| {
                let c = 90.0 + i as f64 * 0.5;
                Bar::new((start + Duration::days(i)).timestamp_millis(), c, c, c, c, 1000.0)
            })
            .collect();
        // Falling intraday closes: RSI at 0
        let intraday: Vec<Bar> = (0..50)
            .map(|i| {
                let c = 150.0 - i as f64;
                let ts = (t0() - Duration::minutes(10 * (50 - i))).timestamp_millis();
                Bar::new(ts, c, c, c, c, 1000.0)
            })
            .collect();

        engine.handle_at(
            EngineEvent::History {
                symbol: SYMBOL.to_string(),
                timeframe: Timeframe::Daily,
                bars: daily,
            },
            t0(),
        );
        engine.handle_at(
            EngineEvent::History {
                symbol: SYMBOL.to_string(),
                timeframe: Timeframe::Minute10,
                bars: intraday,
            },
            t0(),
        );
        engine.handle_at(EngineEvent::Control(EngineCommand::Start), t0());
        engine.handle_at(EngineEvent::BuyingPower(Ok(dec!(10000000))), t0());
        engine
    }

    fn book_tick(prices: &[Decimal], at: DateTime<Utc>) -> EngineEvent {
        EngineEvent::Market(MarketEvent::Tick(Tick::trade(SYMBOL, at, prices[0]).with_book(
            prices.iter().map(|p| BookLevel::new(*p, 100)).collect(),
            Vec::new(),
        )))
    }

    fn price_tick(price: Decimal, at: DateTime<Utc>) -> EngineEvent {
        EngineEvent::Market(MarketEvent::Tick(Tick::trade(SYMBOL, at, price)))
    }

    fn closed_bar(close: f64, at: DateTime<Utc>) -> EngineEvent {
        EngineEvent::Market(MarketEvent::Bar(BarEvent::closed(
            SYMBOL,
            Timeframe::Minute10,
            Bar::new(at.timestamp_millis(), close, close, close, close, 10.0),
        )))
    }

    fn places(actions: &[EngineAction]) -> Vec<OrderIntent> {
        actions
            .iter()
            .filter_map(|a| match a {
                EngineAction::Place(intent) => Some(intent.clone()),
                _ => None,
            })
            .collect()
    }

    fn ladder_prices() -> Vec<Decimal> {
        vec![dec!(100), dec!(99), dec!(98), dec!(97), dec!(96)]
    }

    /// Drive the engine into ENTERING and accept every entry order.
    fn enter(engine: &mut TradingEngine) -> Vec<(OrderIntent, OrderId)> {
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let actions = engine.handle_at(closed_bar(99.0, t0()), t0());
        let intents = places(&actions);
        assert_eq!(intents.len(), 5);

        intents
            .into_iter()
            .enumerate()
            .map(|(i, intent)| {
                let order_id = OrderId::new(format!("B{}", i));
                engine.handle_at(
                    EngineEvent::Placement {
                        intent_id: intent.id,
                        result: Ok(order_id.clone()),
                    },
                    t0(),
                );
                (intent, order_id)
            })
            .collect()
    }

    fn report(engine: &mut TradingEngine, order_id: &OrderId, report: OrderStatusReport) {
        engine.handle_at(
            EngineEvent::OrderUpdate {
                order_id: order_id.clone(),
                result: Ok(report),
            },
            t0(),
        );
    }

    /// Enter and fill every level at its limit price.
    fn hold(engine: &mut TradingEngine) {
        for (intent, order_id) in enter(engine) {
            let price = intent.price.unwrap();
            report(engine, &order_id, OrderStatusReport::filled(intent.quantity, price));
        }
    }

    #[test]
    fn test_entry_emits_ladder() {
        let mut engine = engine_with(params());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let intents = places(&engine.handle_at(closed_bar(99.0, t0()), t0()));

        assert_eq!(intents.len(), 5);
        for (i, intent) in intents.iter().enumerate() {
            assert_eq!(intent.side, Side::Buy);
            assert_eq!(intent.price, Some(ladder_prices()[i]));
            assert_eq!(intent.quantity, 10);
            assert_eq!(intent.reason, IntentReason::Entry { level: i });
        }

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Entering);
        assert_eq!(position.total_quantity, 0);
        assert_eq!(position.entry_orders.len(), 5);
        // Open buys are reserved against buying power
        assert_eq!(engine.available_buying_power(), Some(dec!(10000000) - dec!(4900)));
    }

    #[test]
    fn test_entry_idempotent_while_not_flat() {
        let mut engine = engine_with(params());
        enter(&mut engine);

        let later = t0() + Duration::minutes(10);
        let actions = engine.handle_at(closed_bar(95.0, later), later);
        assert!(places(&actions).is_empty());

        // Re-delivery of the same closed bar is ignored as well
        let actions = engine.handle_at(closed_bar(95.0, later), later);
        assert!(places(&actions).is_empty());
    }

    #[test]
    fn test_fills_compute_average() {
        let mut engine = engine_with(params());
        hold(&mut engine);

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Holding);
        assert_eq!(position.average_entry_price, Some(dec!(98)));
        assert_eq!(position.total_quantity, 50);
        assert_eq!(engine.open_orders().count(), 0);
    }

    #[test]
    fn test_all_entries_rejected_returns_flat() {
        let mut engine = engine_with(params());
        for (_, order_id) in enter(&mut engine) {
            report(
                &mut engine,
                &order_id,
                OrderStatusReport::terminal(OrderStatus::Rejected),
            );
        }

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Flat);
        assert_eq!(position.total_quantity, 0);
        assert_eq!(position.average_entry_price, None);
    }

    #[test]
    fn test_placement_rejection_rolls_back() {
        let mut engine = engine_with(params());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let intents = places(&engine.handle_at(closed_bar(99.0, t0()), t0()));

        for intent in &intents[..4] {
            engine.handle_at(
                EngineEvent::Placement {
                    intent_id: intent.id,
                    result: Err(GatewayError::Rejected("price band".into())),
                },
                t0(),
            );
        }
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Entering);
        assert_eq!(position.entry_orders.len(), 1);

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: intents[4].id,
                result: Err(GatewayError::InsufficientFunds {
                    required: dec!(960),
                    available: dec!(0),
                }),
            },
            t0(),
        );
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Flat);
        assert!(position.entry_orders.is_empty());
        assert_eq!(engine.pending_placements(), 0);
    }

    #[test]
    fn test_overdue_placement_stays_pending() {
        let mut engine = engine_with(params());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let intents = places(&engine.handle_at(closed_bar(99.0, t0()), t0()));
        let first = intents[0].id;

        engine.handle_at(EngineEvent::PlacementOverdue { intent_id: first }, t0());
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Entering);
        let level = position.entry_level(first).unwrap();
        assert_eq!(level.status, OrderStatus::Pending);
        assert!(level.order_id.is_none());

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: first,
                result: Ok(OrderId::new("late")),
            },
            t0(),
        );
        let record = engine.open_orders().find(|r| r.id.as_str() == "late").unwrap();
        assert!(record.overdue);
        assert_eq!(record.status, OrderStatus::Pending);
    }

    fn lookups(actions: &[EngineAction]) -> Vec<IntentId> {
        actions
            .iter()
            .filter_map(|a| match a {
                EngineAction::LookupOrder(intent) => Some(intent.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_timed_out_placements_stay_pending() {
        let mut engine = engine_with(params());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let intents = places(&engine.handle_at(closed_bar(99.0, t0()), t0()));

        let mut looked_up = Vec::new();
        for intent in &intents {
            engine.handle_at(EngineEvent::PlacementOverdue { intent_id: intent.id }, t0());
            let actions = engine.handle_at(
                EngineEvent::Placement {
                    intent_id: intent.id,
                    result: Err(GatewayError::Timeout),
                },
                t0(),
            );
            assert!(places(&actions).is_empty());
            looked_up.extend(lookups(&actions));
        }
        assert_eq!(looked_up, intents.iter().map(|i| i.id).collect::<Vec<_>>());

        // Every level may exist at the broker: no rollback, no second ladder
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Entering);
        assert_eq!(position.entry_orders.len(), 5);
        assert_eq!(engine.pending_placements(), 5);
        assert_eq!(engine.available_buying_power(), Some(dec!(10000000) - dec!(4900)));
        let later = t0() + Duration::minutes(10);
        assert!(places(&engine.handle_at(closed_bar(95.0, later), later)).is_empty());

        // One order reached the broker, the others never did
        engine.handle_at(
            EngineEvent::OrderLookup {
                intent_id: intents[0].id,
                result: Ok(Some(OrderId::new("B0"))),
            },
            t0(),
        );
        for intent in &intents[1..] {
            engine.handle_at(
                EngineEvent::OrderLookup {
                    intent_id: intent.id,
                    result: Ok(None),
                },
                t0(),
            );
        }

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Entering);
        assert_eq!(position.entry_orders.len(), 1);
        assert_eq!(
            position.entry_level(intents[0].id).unwrap().order_id,
            Some(OrderId::new("B0"))
        );
        assert_eq!(engine.pending_placements(), 0);
        let record = engine.open_orders().next().unwrap();
        assert_eq!(record.id, OrderId::new("B0"));
        assert!(record.overdue);
    }

    #[test]
    fn test_failed_lookup_retried_on_timer() {
        let mut engine = engine_with(params());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());
        let intents = places(&engine.handle_at(closed_bar(99.0, t0()), t0()));
        let first = intents[0].id;

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: first,
                result: Err(GatewayError::Server {
                    status: 503,
                    body: String::new(),
                }),
            },
            t0(),
        );
        // Still in flight: the timer does not ask twice
        assert!(lookups(&engine.handle_at(EngineEvent::Timer { now: t0() }, t0())).is_empty());

        engine.handle_at(
            EngineEvent::OrderLookup {
                intent_id: first,
                result: Err(GatewayError::Network("reset".into())),
            },
            t0(),
        );
        assert_eq!(
            lookups(&engine.handle_at(EngineEvent::Timer { now: t0() }, t0())),
            vec![first]
        );

        // Stopping while unresolved cancels the order once it is found
        engine.handle_at(EngineEvent::Control(EngineCommand::Stop), t0());
        let actions = engine.handle_at(
            EngineEvent::OrderLookup {
                intent_id: first,
                result: Ok(Some(OrderId::new("B0"))),
            },
            t0(),
        );
        assert_eq!(
            actions,
            vec![EngineAction::Cancel {
                order_id: OrderId::new("B0")
            }]
        );
    }

    #[test]
    fn test_first_stage_fires_once() {
        let mut engine = engine_with(params());
        hold(&mut engine);

        // avg 98 * 1.02 = 99.96
        let sells = places(&engine.handle_at(price_tick(dec!(99.95), t0()), t0()));
        assert!(sells.is_empty());

        let sells = places(&engine.handle_at(price_tick(dec!(99.96), t0()), t0()));
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].side, Side::Sell);
        assert_eq!(sells[0].quantity, 25);
        assert_eq!(sells[0].reason, IntentReason::FirstTakeProfit);
        let exit = sells[0].clone();

        // Further ticks while the sale is open emit nothing
        assert!(places(&engine.handle_at(price_tick(dec!(100.5), t0()), t0())).is_empty());

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: exit.id,
                result: Ok(OrderId::new("S1")),
            },
            t0(),
        );
        report(&mut engine, &OrderId::new("S1"), OrderStatusReport::filled(25, dec!(100)));

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::PartialExited);
        assert_eq!(position.realized_stage, RealizedStage::FirstSold);
        assert_eq!(position.total_quantity, 25);

        // Back at the first target: no repeat within the cycle
        assert!(places(&engine.handle_at(price_tick(dec!(99.96), t0()), t0())).is_empty());
    }

    #[test]
    fn test_two_stages_in_order() {
        let mut engine = engine_with(params());
        hold(&mut engine);

        // 2% and 3% crossed back to back before the first sale resolves
        let mut sells = places(&engine.handle_at(price_tick(dec!(100), t0()), t0()));
        sells.extend(places(&engine.handle_at(price_tick(dec!(101), t0()), t0())));
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].quantity, 25);

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: sells[0].id,
                result: Ok(OrderId::new("S1")),
            },
            t0(),
        );
        report(&mut engine, &OrderId::new("S1"), OrderStatusReport::filled(25, dec!(101)));

        let second = places(&engine.handle_at(price_tick(dec!(101), t0()), t0()));
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].quantity, 25);
        assert_eq!(second[0].reason, IntentReason::SecondTakeProfit);

        engine.handle_at(
            EngineEvent::Placement {
                intent_id: second[0].id,
                result: Ok(OrderId::new("S2")),
            },
            t0(),
        );
        report(&mut engine, &OrderId::new("S2"), OrderStatusReport::filled(25, dec!(101)));

        // The terminal sale closes the cycle without waiting for a timer
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Flat);
        assert_eq!(position.realized_stage, RealizedStage::FullySold);
        assert_eq!(position.total_quantity, 0);
        assert!(position.exit_order.is_none());
        assert_eq!(position.realized_pnl, dec!(150));

        assert!(places(&engine.handle_at(price_tick(dec!(110), t0()), t0())).is_empty());
    }

    #[test]
    fn test_exit_rejection_rearms_stage() {
        let mut engine = engine_with(params());
        hold(&mut engine);

        let sells = places(&engine.handle_at(price_tick(dec!(100), t0()), t0()));
        engine.handle_at(
            EngineEvent::Placement {
                intent_id: sells[0].id,
                result: Err(GatewayError::Rejected("market closed".into())),
            },
            t0(),
        );

        let position = engine.position(SYMBOL).unwrap();
        assert!(position.exit_order.is_none());
        assert_eq!(position.realized_stage, RealizedStage::None);

        let retry = places(&engine.handle_at(price_tick(dec!(100), t0()), t0()));
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].reason, IntentReason::FirstTakeProfit);
    }

    #[test]
    fn test_stop_suppresses_intents_but_applies_fills() {
        let mut engine = engine_with(params());
        let orders = enter(&mut engine);

        let actions = engine.handle_at(EngineEvent::Control(EngineCommand::Stop), t0());
        let cancels = actions
            .iter()
            .filter(|a| matches!(a, EngineAction::Cancel { .. }))
            .count();
        assert_eq!(cancels, 5);
        assert!(!engine.is_running());

        // A fill that raced the cancel still counts
        let (intent, order_id) = &orders[0];
        report(
            &mut engine,
            order_id,
            OrderStatusReport {
                status: OrderStatus::Cancelled,
                filled_quantity: 4,
                avg_fill_price: intent.price,
            },
        );
        for (_, order_id) in &orders[1..] {
            report(&mut engine, order_id, OrderStatusReport::terminal(OrderStatus::Cancelled));
        }

        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Holding);
        assert_eq!(position.total_quantity, 4);

        // Far past both targets, but stopped
        assert!(places(&engine.handle_at(price_tick(dec!(150), t0()), t0())).is_empty());
        let later = t0() + Duration::minutes(10);
        assert!(places(&engine.handle_at(closed_bar(150.0, later), later)).is_empty());
    }

    #[test]
    fn test_entry_ttl_cancels_open_orders() {
        let mut engine = engine_with(params());
        let orders = enter(&mut engine);
        let (intent, order_id) = &orders[0];
        report(
            &mut engine,
            order_id,
            OrderStatusReport::filled(intent.quantity, intent.price.unwrap()),
        );

        let before_ttl = engine.handle_at(EngineEvent::Timer { now: t0() + Duration::seconds(599) }, t0());
        assert!(!before_ttl.iter().any(|a| matches!(a, EngineAction::Cancel { .. })));

        let expiry = t0() + Duration::seconds(600);
        let actions = engine.handle_at(EngineEvent::Timer { now: expiry }, expiry);
        let cancelled: Vec<&OrderId> = actions
            .iter()
            .filter_map(|a| match a {
                EngineAction::Cancel { order_id } => Some(order_id),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled.len(), 4);

        // The next timer does not cancel twice
        let again = engine.handle_at(EngineEvent::Timer { now: expiry }, expiry);
        assert!(!again.iter().any(|a| matches!(a, EngineAction::Cancel { .. })));

        for (_, order_id) in &orders[1..] {
            report(&mut engine, order_id, OrderStatusReport::terminal(OrderStatus::Cancelled));
        }
        let position = engine.position(SYMBOL).unwrap();
        assert_eq!(position.state, PositionState::Holding);
        assert_eq!(position.total_quantity, 10);
        assert_eq!(position.average_entry_price, Some(dec!(100)));
    }

    #[test]
    fn test_insufficient_buying_power_skips_entry() {
        let mut engine = engine_with(params());
        engine.handle_at(EngineEvent::BuyingPower(Ok(dec!(1000))), t0());
        engine.handle_at(book_tick(&ladder_prices(), t0()), t0());

        let actions = engine.handle_at(closed_bar(99.0, t0()), t0());
        assert!(places(&actions).is_empty());
        assert_eq!(engine.position(SYMBOL).unwrap().state, PositionState::Flat);
    }

    #[test]
    fn test_timer_polls_open_orders() {
        let mut engine = engine_with(params());
        enter(&mut engine);

        let actions = engine.handle_at(EngineEvent::Timer { now: t0() }, t0());
        let polls = actions
            .iter()
            .filter(|a| matches!(a, EngineAction::PollStatus { .. }))
            .count();
        assert_eq!(polls, 5);
    }

    #[test]
    fn test_snapshot_lists_orders() {
        let mut engine = engine_with(params());
        hold(&mut engine);

        let snapshot = engine.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.recent_orders.len(), 5);
        assert!(snapshot
            .recent_orders
            .iter()
            .all(|r| r.status == OrderStatus::Filled));
        assert_eq!(
            snapshot.position(SYMBOL).unwrap().state,
            PositionState::Holding
        );
        assert!(snapshot.indicators[SYMBOL].trend.is_some());
    }

    #[test]
    fn test_unknown_symbol_ignored() {
        let mut engine = engine_with(params());
        let actions = engine.handle_at(
            EngineEvent::Market(MarketEvent::Tick(Tick::trade("000660", t0(), dec!(1)))),
            t0(),
        );
        assert!(actions.is_empty());
        assert!(engine.position("000660").is_none());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = StrategyParams {
            entry_price_levels: 0,
            ..Default::default()
        };
        assert!(TradingEngine::new(params, EngineSettings::default()).is_err());
    }
}
