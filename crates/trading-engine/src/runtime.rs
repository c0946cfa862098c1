//! Async driver of the engine.
//!
//! One task owns the [`TradingEngine`] and processes events strictly in
//! arrival order. Gateway calls run in spawned tasks and report back through
//! the same event channel, so a slow broker never blocks market data.

use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use trading_core::error::{GatewayError, TradingError, TradingResult};
use trading_core::traits::OrderGateway;
use trading_core::types::{MarketEvent, OrderId, OrderIntent, OrderRecord, SymbolPosition};

use crate::engine::{EngineAction, EngineCommand, EngineEvent, TradingEngine};
use crate::snapshot::EngineSnapshot;

const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Cloneable handle for presentation and feeds.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    snapshot: watch::Receiver<EngineSnapshot>,
}

impl EngineHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn get_positions(&self) -> Vec<SymbolPosition> {
        self.snapshot.borrow().positions.clone()
    }

    pub fn get_recent_orders(&self) -> Vec<OrderRecord> {
        self.snapshot.borrow().recent_orders.clone()
    }

    /// Receiver notified after every processed event.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    pub async fn start(&self) -> TradingResult<()> {
        self.send(EngineEvent::Control(EngineCommand::Start)).await
    }

    pub async fn stop(&self) -> TradingResult<()> {
        self.send(EngineEvent::Control(EngineCommand::Stop)).await
    }

    pub async fn send(&self, event: EngineEvent) -> TradingResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| TradingError::ChannelClosed("engine events"))
    }

    /// Raw sender for producers that outlive the handle.
    pub fn sender(&self) -> mpsc::Sender<EngineEvent> {
        self.events.clone()
    }
}

/// Forward market events of a feed into the engine until either side closes.
pub fn forward_market_events(
    mut feed: mpsc::Receiver<MarketEvent>,
    events: mpsc::Sender<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            if events.send(EngineEvent::Market(event)).await.is_err() {
                debug!("Engine gone, market forwarder exiting");
                return;
            }
        }
        warn!("Market data feed closed");
    })
}

/// Owns the engine and executes its actions against a gateway.
pub struct EngineRuntime<G: OrderGateway + 'static> {
    engine: TradingEngine,
    gateway: Arc<G>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    polls_in_flight: HashSet<OrderId>,
    order_deadline: Duration,
    poll_interval: Duration,
    shutdown_grace: Duration,
}

impl<G: OrderGateway + 'static> EngineRuntime<G> {
    pub fn new(engine: TradingEngine, gateway: Arc<G>) -> (Self, EngineHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        let order_deadline = Duration::from_millis(engine.settings().order_deadline_ms);
        let poll_interval = Duration::from_millis(engine.settings().poll_interval_ms.max(1));
        let shutdown_grace = Duration::from_millis(engine.settings().shutdown_grace_ms);

        let handle = EngineHandle {
            events: events_tx.clone(),
            snapshot: snapshot_rx,
        };
        let runtime = Self {
            engine,
            gateway,
            events_tx,
            events_rx,
            snapshot_tx,
            polls_in_flight: HashSet::new(),
            order_deadline,
            poll_interval,
            shutdown_grace,
        };
        (runtime, handle)
    }

    /// Process events until `shutdown` resolves, then stop the engine and
    /// keep processing until what is still open has resolved.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> TradingResult<EngineSnapshot> {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Engine runtime started with gateway {}", self.gateway.name());

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events_rx.recv() => event,
                _ = ticker.tick() => EngineEvent::Timer { now: Utc::now() },
            };
            self.dispatch(event);
        }

        self.shutdown(ticker).await;
        Ok(self.engine.snapshot())
    }

    fn dispatch(&mut self, event: EngineEvent) {
        if let EngineEvent::OrderUpdate { order_id, .. } = &event {
            self.polls_in_flight.remove(order_id);
        }

        let actions = self.engine.handle(event);
        for action in actions {
            self.execute(action);
        }
        self.snapshot_tx.send_replace(self.engine.snapshot());
    }

    fn execute(&mut self, action: EngineAction) {
        let gateway = Arc::clone(&self.gateway);
        let tx = self.events_tx.clone();
        let deadline = self.order_deadline;

        match action {
            EngineAction::Place(intent) => {
                tokio::spawn(place_with_deadline(gateway, intent, deadline, tx));
            }
            EngineAction::LookupOrder(intent) => {
                tokio::spawn(async move {
                    let result = match timeout(deadline, gateway.find_order(&intent)).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout),
                    };
                    let intent_id = intent.id;
                    let _ = tx.send(EngineEvent::OrderLookup { intent_id, result }).await;
                });
            }
            EngineAction::PollStatus { order_id } => {
                if !self.polls_in_flight.insert(order_id.clone()) {
                    return;
                }
                tokio::spawn(async move {
                    let result = match timeout(deadline, gateway.get_order_status(&order_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout),
                    };
                    let _ = tx.send(EngineEvent::OrderUpdate { order_id, result }).await;
                });
            }
            EngineAction::Cancel { order_id } => {
                tokio::spawn(async move {
                    let result = match timeout(deadline, gateway.cancel_order(&order_id)).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout),
                    };
                    let _ = tx.send(EngineEvent::CancelResult { order_id, result }).await;
                });
            }
            EngineAction::RefreshBuyingPower => {
                tokio::spawn(async move {
                    let result = match timeout(deadline, gateway.get_buying_power()).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout),
                    };
                    let _ = tx.send(EngineEvent::BuyingPower(result)).await;
                });
            }
        }
    }

    /// Nothing is left for shutdown to wait on.
    fn settled(&self) -> bool {
        let cancelling = self.engine.settings().cancel_open_orders_on_stop;
        self.engine.pending_placements() == 0
            && (!cancelling || self.engine.open_orders().next().is_none())
    }

    /// Stop the engine, then apply cancel results, status polls and late
    /// placements until everything settled or the grace period ran out.
    async fn shutdown(&mut self, mut ticker: tokio::time::Interval) {
        self.dispatch(EngineEvent::Control(EngineCommand::Stop));

        let grace = sleep(self.shutdown_grace);
        tokio::pin!(grace);
        while !self.settled() {
            let event = tokio::select! {
                _ = &mut grace => {
                    warn!(
                        "Shutdown grace period over with {} open orders and {} pending placements",
                        self.engine.open_orders().count(),
                        self.engine.pending_placements()
                    );
                    break;
                }
                Some(event) = self.events_rx.recv() => event,
                _ = ticker.tick() => EngineEvent::Timer { now: Utc::now() },
            };
            self.dispatch(event);
        }

        self.snapshot_tx.send_replace(self.engine.snapshot());
        info!("Engine runtime stopped");
    }
}

/// Place an order, reporting `PlacementOverdue` once the deadline passes and
/// the final outcome whenever the call returns.
pub async fn place_with_deadline<G: OrderGateway + ?Sized>(
    gateway: Arc<G>,
    intent: OrderIntent,
    deadline: Duration,
    tx: mpsc::Sender<EngineEvent>,
) {
    let intent_id = intent.id;
    let call = gateway.place_order(&intent);
    tokio::pin!(call);

    let result = match timeout(deadline, &mut call).await {
        Ok(result) => result,
        Err(_) => {
            let _ = tx.send(EngineEvent::PlacementOverdue { intent_id }).await;
            call.await
        }
    };
    let _ = tx.send(EngineEvent::Placement { intent_id, result }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::params::StrategyParams;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use trading_core::types::{
        Bar, BarEvent, BookLevel, IntentReason, OrderStatus, OrderStatusReport, PositionState,
        Side, Tick, Timeframe,
    };

    struct SlowGateway {
        delay: Duration,
        balance_calls: AtomicUsize,
    }

    #[async_trait]
    impl OrderGateway for SlowGateway {
        async fn place_order(&self, _intent: &OrderIntent) -> Result<OrderId, GatewayError> {
            tokio::time::sleep(self.delay).await;
            Ok(OrderId::new("0001"))
        }

        async fn find_order(&self, _intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
            Ok(None)
        }

        async fn get_order_status(
            &self,
            _order_id: &OrderId,
        ) -> Result<OrderStatusReport, GatewayError> {
            Ok(OrderStatusReport::pending())
        }

        async fn cancel_order(&self, _order_id: &OrderId) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(dec!(1000000))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn gateway(delay_ms: u64) -> Arc<SlowGateway> {
        Arc::new(SlowGateway {
            delay: Duration::from_millis(delay_ms),
            balance_calls: AtomicUsize::new(0),
        })
    }

    fn intent() -> OrderIntent {
        OrderIntent::limit("005930", Side::Buy, dec!(70000), 1, IntentReason::Entry { level: 0 })
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_placement_reports_both_events() {
        let (tx, mut rx) = mpsc::channel(8);
        let intent = intent();
        let id = intent.id;

        tokio::spawn(place_with_deadline(
            gateway(500),
            intent,
            Duration::from_millis(100),
            tx,
        ));

        match rx.recv().await {
            Some(EngineEvent::PlacementOverdue { intent_id }) => assert_eq!(intent_id, id),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await {
            Some(EngineEvent::Placement { intent_id, result }) => {
                assert_eq!(intent_id, id);
                assert_eq!(result.unwrap(), OrderId::new("0001"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_placement_is_not_overdue() {
        let (tx, mut rx) = mpsc::channel(8);
        place_with_deadline(gateway(10), intent(), Duration::from_millis(100), tx).await;

        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::Placement { result: Ok(_), .. })
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let settings = EngineSettings {
            symbols: vec!["005930".to_string()],
            poll_interval_ms: 50,
            ..Default::default()
        };
        let engine = TradingEngine::new(StrategyParams::default(), settings).unwrap();
        let gw = gateway(0);
        let (runtime, handle) = EngineRuntime::new(engine, Arc::clone(&gw));

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(runtime.run(async {
            let _ = stop_rx.await;
        }));

        handle.start().await.unwrap();
        let mut updates = handle.subscribe();
        let ready = timeout(Duration::from_secs(5), async {
            loop {
                if updates.borrow().buying_power.is_some() {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(ready.is_ok());

        let snapshot = handle.snapshot();
        assert!(snapshot.running);
        assert_eq!(snapshot.buying_power, Some(dec!(1000000)));
        assert_eq!(handle.get_positions().len(), 1);
        assert!(handle.get_recent_orders().is_empty());
        assert!(gw.balance_calls.load(Ordering::SeqCst) >= 1);

        handle.stop().await.unwrap();
        let stopped = timeout(Duration::from_secs(5), async {
            while updates.borrow_and_update().running {
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(stopped.is_ok());

        let _ = stop_tx.send(());
        let final_snapshot = task.await.unwrap().unwrap();
        assert!(!final_snapshot.running);
    }

    /// Accepts every order and lets it fill while the cancel is in flight.
    struct FillOnCancelGateway {
        next_id: AtomicUsize,
        orders: Mutex<HashMap<OrderId, (u64, Decimal, bool)>>,
    }

    impl FillOnCancelGateway {
        fn new() -> Self {
            Self {
                next_id: AtomicUsize::new(0),
                orders: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for FillOnCancelGateway {
        async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError> {
            let id = OrderId::new(format!("B{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
            let price = intent.price.unwrap_or_default();
            self.orders
                .lock()
                .unwrap()
                .insert(id.clone(), (intent.quantity, price, false));
            Ok(id)
        }

        async fn find_order(&self, _intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
            Ok(None)
        }

        async fn get_order_status(
            &self,
            order_id: &OrderId,
        ) -> Result<OrderStatusReport, GatewayError> {
            match self.orders.lock().unwrap().get(order_id) {
                Some((qty, price, true)) => Ok(OrderStatusReport::filled(*qty, *price)),
                Some(_) => Ok(OrderStatusReport::pending()),
                None => Err(GatewayError::OrderNotFound(order_id.to_string())),
            }
        }

        async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError> {
            if let Some(order) = self.orders.lock().unwrap().get_mut(order_id) {
                order.2 = true;
            }
            // Too late: the order executed first
            Ok(false)
        }

        async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
            Ok(dec!(1000000))
        }

        fn name(&self) -> &str {
            "fill-on-cancel"
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 1, 0, 0).unwrap()
    }

    /// Engine with a rising daily trend and an oversold 10-minute RSI.
    fn oversold_engine() -> TradingEngine {
        let settings = EngineSettings {
            symbols: vec!["005930".to_string()],
            poll_interval_ms: 20,
            ..Default::default()
        };
        let params = StrategyParams {
            sizing: crate::params::EntrySizing::Shares { quantity: 50 },
            ..Default::default()
        };
        let mut engine = TradingEngine::new(params, settings).unwrap();
        let daily: Vec<Bar> = (0..30)
            .map(|i| {
                let c = 90.0 + i as f64 * 0.5;
                let ts = (t0() - ChronoDuration::days(60 - i)).timestamp_millis();
                Bar::new(ts, c, c, c, c, 1000.0)
            })
            .collect();
        let intraday: Vec<Bar> = (0..50)
            .map(|i| {
                let c = 150.0 - i as f64;
                let ts = (t0() - ChronoDuration::minutes(10 * (50 - i))).timestamp_millis();
                Bar::new(ts, c, c, c, c, 1000.0)
            })
            .collect();
        for (timeframe, bars) in [(Timeframe::Daily, daily), (Timeframe::Minute10, intraday)] {
            engine.handle_at(
                EngineEvent::History {
                    symbol: "005930".to_string(),
                    timeframe,
                    bars,
                },
                t0(),
            );
        }
        engine
    }

    async fn wait_until(handle: &EngineHandle, ready: impl Fn(&EngineSnapshot) -> bool) {
        let mut updates = handle.subscribe();
        let reached = timeout(Duration::from_secs(5), async {
            loop {
                if ready(&updates.borrow_and_update()) {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(reached.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_applies_fills_that_race_the_cancel() {
        let gw = Arc::new(FillOnCancelGateway::new());
        let (runtime, handle) = EngineRuntime::new(oversold_engine(), Arc::clone(&gw));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(runtime.run(async {
            let _ = stop_rx.await;
        }));

        handle.start().await.unwrap();
        wait_until(&handle, |s| s.buying_power.is_some()).await;

        let bids = [dec!(100), dec!(99), dec!(98), dec!(97), dec!(96)]
            .iter()
            .map(|p| BookLevel::new(*p, 100))
            .collect();
        let tick = Tick::trade("005930", t0(), dec!(100)).with_book(bids, Vec::new());
        handle.send(EngineEvent::Market(MarketEvent::Tick(tick))).await.unwrap();
        let bar = Bar::new(t0().timestamp_millis(), 99.0, 99.0, 99.0, 99.0, 10.0);
        handle
            .send(EngineEvent::Market(MarketEvent::Bar(BarEvent::closed(
                "005930",
                Timeframe::Minute10,
                bar,
            ))))
            .await
            .unwrap();
        wait_until(&handle, |s| s.recent_orders.len() == 5).await;

        let _ = stop_tx.send(());
        let snapshot = task.await.unwrap().unwrap();

        // Every cancel lost the race, and every fill still landed
        assert!(!snapshot.running);
        let position = snapshot.position("005930").unwrap();
        assert_eq!(position.state, PositionState::Holding);
        assert_eq!(position.total_quantity, 50);
        assert_eq!(position.average_entry_price, Some(dec!(98)));
        assert!(snapshot
            .recent_orders
            .iter()
            .all(|r| r.status == OrderStatus::Filled));
        assert_eq!(handle.snapshot().position("005930").unwrap().total_quantity, 50);
    }
}
