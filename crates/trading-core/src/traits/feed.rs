//! Market data and authentication collaborator traits.

use crate::error::{AuthError, DataFeedError};
use crate::types::{Bar, MarketEvent, Timeframe};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Streaming market data source.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Subscribe to ticks and book updates for `symbols`.
    ///
    /// # Returns
    /// A channel receiver of normalized events. The feed reconnects on its
    /// own; the channel only closes when the feed shuts down.
    async fn subscribe(
        &self,
        symbols: &[String],
    ) -> Result<mpsc::Receiver<MarketEvent>, DataFeedError>;

    /// Get the feed name.
    fn name(&self) -> &str;
}

/// Source of closed historical bars.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch up to `count` most recent closed bars, oldest first.
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Bar>, DataFeedError>;
}

/// Supplier of a currently valid bearer token.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Return a valid access token, refreshing it first if needed.
    async fn bearer_token(&self) -> Result<String, AuthError>;

    /// Drop the cached token after the server rejected it.
    async fn invalidate(&self) {}
}
