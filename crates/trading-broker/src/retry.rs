//! Bounded exponential backoff around an order gateway.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;
use trading_core::error::GatewayError;
use trading_core::traits::OrderGateway;
use trading_core::types::{OrderId, OrderIntent, OrderStatusReport};

/// Retry budget for retryable gateway errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `op` until it succeeds, fails permanently or the budget is spent.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        retryable: impl Fn(&GatewayError) -> bool,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && retryable(&e) => {
                    attempt += 1;
                    let mut delay = self.delay(attempt);
                    if let GatewayError::RateLimited {
                        retry_after_secs: Some(secs),
                    } = &e
                    {
                        delay = delay.max(Duration::from_secs(*secs));
                    }
                    warn!(
                        "{} failed: {}, retry {}/{} in {:?}",
                        what, e, attempt, self.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Placements only retry errors where the order was certainly not accepted.
fn placement_retryable(e: &GatewayError) -> bool {
    matches!(e, GatewayError::RateLimited { .. })
}

/// Gateway wrapper that retries retryable errors with backoff.
pub struct RetryingGateway<G> {
    inner: G,
    policy: BackoffPolicy,
}

impl<G: OrderGateway> RetryingGateway<G> {
    pub fn new(inner: G, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: OrderGateway> OrderGateway for RetryingGateway<G> {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderId, GatewayError> {
        self.policy
            .run("place_order", placement_retryable, || self.inner.place_order(intent))
            .await
    }

    async fn find_order(&self, intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
        self.policy
            .run("find_order", GatewayError::is_retryable, || {
                self.inner.find_order(intent)
            })
            .await
    }

    async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusReport, GatewayError> {
        self.policy
            .run("get_order_status", GatewayError::is_retryable, || {
                self.inner.get_order_status(order_id)
            })
            .await
    }

    async fn cancel_order(&self, order_id: &OrderId) -> Result<bool, GatewayError> {
        self.policy
            .run("cancel_order", GatewayError::is_retryable, || {
                self.inner.cancel_order(order_id)
            })
            .await
    }

    async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
        self.policy
            .run("get_buying_power", GatewayError::is_retryable, || {
                self.inner.get_buying_power()
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use trading_core::types::{IntentReason, Side};

    /// Fails the first `failures` calls with `error`.
    struct FlakyGateway {
        failures: u32,
        error: GatewayError,
        calls: AtomicU32,
    }

    impl FlakyGateway {
        fn new(failures: u32, error: GatewayError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
            }
        }

        fn attempt(&self) -> Result<(), GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl OrderGateway for FlakyGateway {
        async fn place_order(&self, _intent: &OrderIntent) -> Result<OrderId, GatewayError> {
            self.attempt().map(|_| OrderId::new("1"))
        }

        async fn find_order(&self, _intent: &OrderIntent) -> Result<Option<OrderId>, GatewayError> {
            self.attempt().map(|_| Some(OrderId::new("1")))
        }

        async fn get_order_status(
            &self,
            _order_id: &OrderId,
        ) -> Result<OrderStatusReport, GatewayError> {
            self.attempt().map(|_| OrderStatusReport::pending())
        }

        async fn cancel_order(&self, _order_id: &OrderId) -> Result<bool, GatewayError> {
            self.attempt().map(|_| true)
        }

        async fn get_buying_power(&self) -> Result<Decimal, GatewayError> {
            self.attempt().map(|_| dec!(1000))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent::market("005930", Side::Sell, 1, IntentReason::FirstTakeProfit)
    }

    #[test]
    fn test_delay_growth_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(10), Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let gateway = RetryingGateway::new(
            FlakyGateway::new(2, GatewayError::Network("reset".into())),
            BackoffPolicy::default(),
        );
        assert_eq!(gateway.get_buying_power().await.unwrap(), dec!(1000));
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let gateway = RetryingGateway::new(
            FlakyGateway::new(10, GatewayError::Timeout),
            BackoffPolicy::default(),
        );
        assert!(matches!(
            gateway.get_order_status(&OrderId::new("1")).await,
            Err(GatewayError::Timeout)
        ));
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let gateway = RetryingGateway::new(
            FlakyGateway::new(1, GatewayError::Rejected("halted".into())),
            BackoffPolicy::default(),
        );
        assert!(gateway.cancel_order(&OrderId::new("1")).await.is_err());
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_placement_only_retries_rate_limits() {
        let gateway = RetryingGateway::new(
            FlakyGateway::new(1, GatewayError::Network("reset".into())),
            BackoffPolicy::default(),
        );
        assert!(gateway.place_order(&intent()).await.is_err());
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 1);

        let gateway = RetryingGateway::new(
            FlakyGateway::new(
                2,
                GatewayError::RateLimited {
                    retry_after_secs: Some(1),
                },
            ),
            BackoffPolicy::default(),
        );
        assert_eq!(gateway.place_order(&intent()).await.unwrap(), OrderId::new("1"));
        assert_eq!(gateway.inner().calls.load(Ordering::SeqCst), 3);
    }
}
