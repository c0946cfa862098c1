//! Order gateway trait definition.

use crate::error::GatewayError;
use crate::types::{OrderId, OrderIntent, OrderStatusReport};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Trait for order execution venues.
///
/// The engine only asks the gateway for transitions; order records stay owned
/// by the engine.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit an order for the intent.
    ///
    /// # Returns
    /// The gateway-assigned order id
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError>;

    /// Find the order placed for an intent whose placement outcome is
    /// unknown.
    ///
    /// # Returns
    /// The order id, or `None` when the broker never received the intent
    async fn find_order(&self, intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError>;

    /// Get the cumulative fill status of an order.
    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusReport, GatewayError>;

    /// Cancel an order.
    ///
    /// # Returns
    /// `true` when the gateway accepted the cancel request
    async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError>;

    /// Cash available for new buy orders.
    async fn get_buying_power(&self) -> Result<Decimal, GatewayError>;

    /// Get the gateway name.
    fn name(&self) -> &str;
}

#[async_trait]
impl<G: OrderGateway + ?Sized> OrderGateway for std::sync::Arc<G> {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError> {
        (**self).place_order(intent).await
    }

    async fn find_order(&self, intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
        (**self).find_order(intent).await
    }

    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusReport, GatewayError> {
        (**self).get_order_status(order_id).await
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError> {
        (**self).cancel_order(order_id).await
    }

    async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
        (**self).get_buying_power().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
