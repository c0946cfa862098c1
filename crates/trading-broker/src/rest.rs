//! REST order gateway of the brokerage.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use trading_core::error::{AuthError, GatewayError};
use trading_core::traits::{AccessTokenProvider, OrderGateway};
use trading_core::types::{OrderId, OrderIntent, OrderKind, OrderStatus, OrderStatusReport, Side};

use crate::server::Server;

/// Result code of a successful call.
const SUCCESS_CODE: &str = "0000";

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: Option<String>,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct LimitOrderRequest<'a> {
    /// Intent id, used to find the order when the response is lost
    client_order_id: String,
    symbol: &'a str,
    side: &'static str,
    quantity: u64,
    price: i64,
}

#[derive(Debug, Serialize)]
struct MarketOrderRequest<'a> {
    client_order_id: String,
    symbol: &'a str,
    side: &'static str,
    quantity: u64,
}

#[derive(Debug, Serialize)]
struct CancelRequest<'a> {
    order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderAck {
    order_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderDetail {
    status: String,
    #[serde(default)]
    filled_quantity: u64,
    avg_fill_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct CancelAck {
    #[serde(default = "default_true")]
    cancelled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct Balance {
    #[serde(alias = "orderable_amount")]
    buying_power: Decimal,
}

/// Order gateway over the broker's REST API.
pub struct RestGateway {
    client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    name: String,
}

impl RestGateway {
    pub fn new(server: Server, tokens: Arc<dyn AccessTokenProvider>, client: Client) -> Self {
        Self {
            client,
            base_url: server.rest_url().to_string(),
            tokens,
            name: format!("kiwoom-{}", server),
        }
    }

    /// Point the gateway at another base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the shared HTTP client.
    pub fn http_client(timeout: Duration) -> Result<Client, GatewayError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, GatewayError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}{}", self.base_url, path);

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json;charset=UTF-8");
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let text = resp.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
            }
            return Err(status_error(status, retry_after, text));
        }

        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        unwrap_envelope(envelope)
    }
}

fn side_code(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// Map a non-success HTTP status to the gateway error taxonomy.
fn status_error(status: StatusCode, retry_after_secs: Option<u64>, body: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED => GatewayError::Auth(AuthError::Unauthorized(body)),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited { retry_after_secs },
        StatusCode::NOT_FOUND => GatewayError::OrderNotFound(body),
        s if s.is_server_error() => GatewayError::Server {
            status: s.as_u16(),
            body,
        },
        s => GatewayError::Rejected(format!("{}: {}", s, body)),
    }
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<T, GatewayError> {
    if let Some(code) = envelope.status.as_deref() {
        if code != SUCCESS_CODE {
            let message = envelope.message.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{}: {}", code, message)));
        }
    }
    envelope
        .data
        .ok_or_else(|| GatewayError::InvalidResponse("missing data".to_string()))
}

/// A lookup that finds nothing means the broker never received the order.
fn found_order(result: Result<OrderAck, GatewayError>) -> Result<Option<OrderId>, GatewayError> {
    match result {
        Ok(ack) => Ok(Some(OrderId::new(ack.order_id))),
        Err(GatewayError::OrderNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_status(status: &str) -> Result<OrderStatus, GatewayError> {
    match status.to_lowercase().as_str() {
        "pending" | "received" | "accepted" | "new" | "open" => Ok(OrderStatus::Pending),
        "partially_filled" | "partial" => Ok(OrderStatus::PartiallyFilled),
        "filled" | "executed" => Ok(OrderStatus::Filled),
        "cancelled" | "canceled" | "expired" => Ok(OrderStatus::Cancelled),
        "rejected" => Ok(OrderStatus::Rejected),
        other => Err(GatewayError::InvalidResponse(format!("Unknown order status: {}", other))),
    }
}

fn into_report(detail: OrderDetail) -> Result<OrderStatusReport, GatewayError> {
    let status = match parse_status(&detail.status)? {
        OrderStatus::Pending if detail.filled_quantity > 0 => OrderStatus::PartiallyFilled,
        other => other,
    };
    Ok(OrderStatusReport {
        status,
        filled_quantity: detail.filled_quantity,
        avg_fill_price: detail.avg_fill_price,
    })
}

#[async_trait]
impl OrderGateway for RestGateway {
    #[instrument(skip(self, intent), fields(symbol = %intent.symbol, side = %intent.side, qty = intent.quantity))]
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError> {
        let side = side_code(intent.side);
        let ack: OrderAck = match (intent.kind, intent.price) {
            (OrderKind::Limit, Some(price)) => {
                let price = price
                    .trunc()
                    .to_i64()
                    .ok_or_else(|| GatewayError::Rejected(format!("Price out of range: {}", price)))?;
                let body = LimitOrderRequest {
                    client_order_id: intent.id.to_string(),
                    symbol: &intent.symbol,
                    side,
                    quantity: intent.quantity,
                    price,
                };
                debug!("Submitting limit order: {:?}", body);
                self.call(Method::POST, "/v1/trading/orders/limit", Some(&body))
                    .await?
            }
            (OrderKind::Limit, None) => {
                return Err(GatewayError::Rejected("Limit order without price".to_string()))
            }
            (OrderKind::Market, _) => {
                let body = MarketOrderRequest {
                    client_order_id: intent.id.to_string(),
                    symbol: &intent.symbol,
                    side,
                    quantity: intent.quantity,
                };
                debug!("Submitting market order: {:?}", body);
                self.call(Method::POST, "/v1/trading/orders/market", Some(&body))
                    .await?
            }
        };

        info!(
            "Order submitted: {} {} {} @ {:?} -> {}",
            side, intent.quantity, intent.symbol, intent.price, ack.order_id
        );
        Ok(OrderId::new(ack.order_id))
    }

    #[instrument(skip(self, intent), fields(intent_id = %intent.id))]
    async fn find_order(&self, intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
        let path = format!("/v1/trading/orders/client/{}", intent.id);
        let found = found_order(self.call::<(), OrderAck>(Method::GET, &path, None).await)?;
        match &found {
            Some(order_id) => info!("Order {} found for intent {}", order_id, intent.id),
            None => debug!("No order for intent {}", intent.id),
        }
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusReport, GatewayError> {
        let path = format!("/v1/trading/orders/{}", order_id);
        let detail: OrderDetail = self.call::<(), _>(Method::GET, &path, None).await?;
        into_report(detail)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError> {
        let body = CancelRequest {
            order_id: order_id.as_str(),
        };
        let ack: CancelAck = self
            .call(Method::POST, "/v1/trading/orders/cancel", Some(&body))
            .await?;
        if ack.cancelled {
            info!("Order canceled: {}", order_id);
        } else {
            warn!("Cancel refused: {}", order_id);
        }
        Ok(ack.cancelled)
    }

    #[instrument(skip(self))]
    async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
        let balance: Balance = self
            .call::<(), _>(Method::GET, "/v1/trading/inquiry/balance", None)
            .await?;
        Ok(balance.buying_power)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
