//! Paper trading gateway for replay and simulation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use trading_core::error::GatewayError;
use trading_core::traits::OrderGateway;
use trading_core::types::{
    OrderId, OrderIntent, OrderKind, OrderStatus, OrderStatusReport, Side,
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PaperOrder {
    intent: OrderIntent,
    status: OrderStatus,
    filled_quantity: u64,
    avg_fill_price: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl PaperOrder {
    fn report(&self) -> OrderStatusReport {
        OrderStatusReport {
            status: self.status,
            filled_quantity: self.filled_quantity,
            avg_fill_price: self.avg_fill_price,
        }
    }

    /// Price at which the order executes against `mark`, if it does.
    fn execution_price(&self, mark: Decimal, slippage_pct: Decimal) -> Option<Decimal> {
        match (self.intent.kind, self.intent.price) {
            (OrderKind::Limit, Some(limit)) => match self.intent.side {
                Side::Buy if mark <= limit => Some(limit),
                Side::Sell if mark >= limit => Some(limit),
                _ => None,
            },
            _ => {
                let slip = mark * slippage_pct / Decimal::ONE_HUNDRED;
                match self.intent.side {
                    Side::Buy => Some(mark + slip),
                    Side::Sell => Some(mark - slip),
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    holdings: HashMap<String, u64>,
    orders: HashMap<OrderId, PaperOrder>,
    marks: HashMap<String, Decimal>,
}

impl PaperState {
    /// Cash not committed to open buy orders.
    fn free_cash(&self) -> Decimal {
        let reserved: Decimal = self
            .orders
            .values()
            .filter(|o| o.status.is_active() && o.intent.side == Side::Buy)
            .map(|o| o.intent.notional())
            .sum();
        self.cash - reserved
    }
}

/// In-process broker.
///
/// Limit buys fill at their limit once a marked price trades at or below it,
/// limit sells at or above it; market orders fill at the next mark (or the
/// current one) with slippage. Cash is debited on buy fills and credited on
/// sell fills.
pub struct PaperGateway {
    state: Arc<Mutex<PaperState>>,
    slippage_pct: Decimal,
    commission_per_share: Decimal,
}

impl PaperGateway {
    /// Create a new paper gateway with initial cash.
    pub fn new(initial_cash: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperState {
                cash: initial_cash,
                ..Default::default()
            })),
            slippage_pct: Decimal::ZERO,
            commission_per_share: Decimal::ZERO,
        }
    }

    /// Set slippage percentage applied to market orders.
    pub fn with_slippage(mut self, slippage_pct: Decimal) -> Self {
        self.slippage_pct = slippage_pct;
        self
    }

    /// Set commission per share.
    pub fn with_commission(mut self, commission: Decimal) -> Self {
        self.commission_per_share = commission;
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a traded price and execute every open order it crosses.
    pub fn mark(&self, symbol: &str, price: Decimal) {
        let mut state = self.lock();
        state.marks.insert(symbol.to_string(), price);

        let mut crossing: Vec<(OrderId, Decimal)> = state
            .orders
            .iter()
            .filter(|(_, o)| o.status.is_active() && o.intent.symbol == symbol)
            .filter_map(|(id, o)| {
                o.execution_price(price, self.slippage_pct)
                    .map(|fill| (id.clone(), fill))
            })
            .collect();
        crossing.sort_by(|a, b| {
            let ta = state.orders.get(&a.0).map(|o| o.created_at);
            let tb = state.orders.get(&b.0).map(|o| o.created_at);
            ta.cmp(&tb)
        });

        for (order_id, fill_price) in crossing {
            self.execute(&mut state, &order_id, fill_price);
        }
    }

    fn execute(&self, state: &mut PaperState, order_id: &OrderId, fill_price: Decimal) {
        let Some(order) = state.orders.get(order_id) else {
            return;
        };
        let symbol = order.intent.symbol.clone();
        let side = order.intent.side;
        let quantity = order.intent.quantity - order.filled_quantity;
        let held = state.holdings.get(&symbol).copied().unwrap_or(0);

        // Sells never exceed the holding
        let quantity = match side {
            Side::Buy => quantity,
            Side::Sell => quantity.min(held),
        };
        let commission = self.commission_per_share * Decimal::from(quantity);
        let value = fill_price * Decimal::from(quantity);

        if let Some(order) = state.orders.get_mut(order_id) {
            if quantity == 0 {
                order.status = OrderStatus::Rejected;
                return;
            }
            order.filled_quantity += quantity;
            order.avg_fill_price = Some(fill_price);
            order.status = OrderStatus::Filled;
        }

        match side {
            Side::Buy => {
                state.cash -= value + commission;
                *state.holdings.entry(symbol.clone()).or_insert(0) += quantity;
            }
            Side::Sell => {
                state.cash += value - commission;
                let remaining = held - quantity;
                if remaining == 0 {
                    state.holdings.remove(&symbol);
                } else {
                    state.holdings.insert(symbol.clone(), remaining);
                }
            }
        }

        debug!("Paper fill: {} {} {} @ {}", side, quantity, symbol, fill_price);
    }

    /// Cash balance.
    pub fn cash(&self) -> Decimal {
        self.lock().cash
    }

    /// Shares held of `symbol`.
    pub fn holding(&self, symbol: &str) -> u64 {
        self.lock().holdings.get(symbol).copied().unwrap_or(0)
    }

    /// Cash plus holdings at the last marks.
    pub fn equity(&self) -> Decimal {
        let state = self.lock();
        let holdings: Decimal = state
            .holdings
            .iter()
            .map(|(symbol, qty)| {
                state.marks.get(symbol).copied().unwrap_or(Decimal::ZERO) * Decimal::from(*qty)
            })
            .sum();
        state.cash + holdings
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError> {
        if intent.quantity == 0 {
            return Err(GatewayError::Rejected("Zero quantity".to_string()));
        }
        if intent.kind == OrderKind::Limit && intent.price.is_none() {
            return Err(GatewayError::Rejected("Limit order without price".to_string()));
        }

        let mut state = self.lock();
        match intent.side {
            Side::Buy if intent.kind == OrderKind::Limit => {
                let required = intent.notional();
                let available = state.free_cash();
                if required > available {
                    return Err(GatewayError::InsufficientFunds {
                        required,
                        available,
                    });
                }
            }
            Side::Sell => {
                let held = state.holdings.get(&intent.symbol).copied().unwrap_or(0);
                if held < intent.quantity {
                    return Err(GatewayError::Rejected(format!(
                        "Sell {} exceeds holding {}",
                        intent.quantity, held
                    )));
                }
            }
            Side::Buy => {}
        }

        let order_id = OrderId::new(Uuid::new_v4().simple().to_string());
        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                intent: intent.clone(),
                status: OrderStatus::Pending,
                filled_quantity: 0,
                avg_fill_price: None,
                created_at: Utc::now(),
            },
        );
        info!(
            "Paper order accepted: {} {} {} @ {:?}",
            intent.side, intent.quantity, intent.symbol, intent.price
        );

        // Orders marketable at the last mark execute immediately
        if let Some(mark) = state.marks.get(&intent.symbol).copied() {
            let price = state
                .orders
                .get(&order_id)
                .and_then(|o| o.execution_price(mark, self.slippage_pct));
            if let Some(price) = price {
                self.execute(&mut state, &order_id, price);
            }
        }

        Ok(order_id)
    }

    async fn find_order(&self, intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|(_, o)| o.intent.id == intent.id)
            .map(|(id, _)| id.clone()))
    }

    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusReport, GatewayError> {
        self.lock()
            .orders
            .get(order_id)
            .map(PaperOrder::report)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError> {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        if order.status.is_terminal() {
            return Ok(false);
        }
        order.status = OrderStatus::Cancelled;
        Ok(true)
    }

    async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
        Ok(self.lock().cash)
    }

    fn name(&self) -> &str {
        "paper"
    }
}
