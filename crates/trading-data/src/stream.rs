//! WebSocket market data feed.
//!
//! Connects to the broker's streaming endpoint, subscribes to the `ticker`
//! and `orderbook` channels of every symbol and decodes each frame once into
//! a [`MarketEvent`]. Ticks always carry the latest known book of their
//! symbol. Trades are also aggregated into closed 10-minute bars. On
//! disconnect the feed reports it, waits with exponential backoff, reconnects
//! and resubscribes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use trading_core::error::DataFeedError;
use trading_core::traits::{AccessTokenProvider, MarketDataFeed};
use trading_core::types::{BookLevel, MarketEvent, Tick, Timeframe};

use crate::aggregator::BarAggregator;

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub channel_capacity: usize,
    /// How often open bars are checked for an elapsed bucket
    pub bar_flush_interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            channel_capacity: 1024,
            bar_flush_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize)]
struct SubscribeMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    channels: Vec<Channel>,
}

#[derive(Debug, Serialize)]
struct Channel {
    name: &'static str,
    symbols: Vec<String>,
}

fn subscribe_message(symbols: &[String]) -> SubscribeMessage {
    let channels = symbols
        .iter()
        .flat_map(|symbol| {
            ["ticker", "orderbook"].into_iter().map(move |name| Channel {
                name,
                symbols: vec![symbol.clone()],
            })
        })
        .collect();
    SubscribeMessage {
        kind: "subscribe",
        channels,
    }
}

#[derive(Debug, Deserialize)]
struct OrderbookUnit {
    bid_price: Decimal,
    bid_size: u64,
    ask_price: Decimal,
    ask_size: u64,
}

/// A decoded streaming frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
enum Frame {
    Ticker {
        symbol: String,
        trade_price: Decimal,
        /// Unix milliseconds, arrival time when absent
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        trade_volume: Option<f64>,
    },
    Orderbook {
        symbol: String,
        #[serde(default)]
        orderbook_units: Vec<OrderbookUnit>,
    },
}

fn decode_frame(text: &str) -> Result<Frame, DataFeedError> {
    serde_json::from_str(text).map_err(|e| DataFeedError::ParseError(e.to_string()))
}

#[derive(Debug, Default, Clone)]
struct SymbolBook {
    last_price: Option<Decimal>,
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
}

/// Turns frames into market events, tracking the book and open bars.
#[derive(Debug)]
struct FrameProcessor {
    books: HashMap<String, SymbolBook>,
    bars: BarAggregator,
}

impl FrameProcessor {
    fn new() -> Self {
        Self {
            books: HashMap::new(),
            bars: BarAggregator::new(Timeframe::Minute10),
        }
    }

    fn process(&mut self, frame: Frame, received_at: DateTime<Utc>) -> Vec<MarketEvent> {
        let mut events = Vec::new();
        match frame {
            Frame::Ticker {
                symbol,
                trade_price,
                timestamp,
                trade_volume,
            } => {
                let at = timestamp
                    .and_then(DateTime::from_timestamp_millis)
                    .unwrap_or(received_at);
                if let Some(closed) = self.bars.on_trade(
                    &symbol,
                    at.timestamp_millis(),
                    trade_price.to_f64().unwrap_or_default(),
                    trade_volume.unwrap_or_default(),
                ) {
                    events.push(MarketEvent::Bar(closed));
                }

                let book = self.books.entry(symbol.clone()).or_default();
                book.last_price = Some(trade_price);
                events.push(MarketEvent::Tick(
                    Tick::trade(symbol, at, trade_price).with_book(book.bids.clone(), book.asks.clone()),
                ));
            }
            Frame::Orderbook {
                symbol,
                orderbook_units,
            } => {
                let book = self.books.entry(symbol.clone()).or_default();
                book.bids = orderbook_units
                    .iter()
                    .filter(|u| u.bid_price > Decimal::ZERO)
                    .map(|u| BookLevel::new(u.bid_price, u.bid_size))
                    .collect();
                book.asks = orderbook_units
                    .iter()
                    .filter(|u| u.ask_price > Decimal::ZERO)
                    .map(|u| BookLevel::new(u.ask_price, u.ask_size))
                    .collect();

                // A book without any trade yet has no price to report
                if let Some(price) = book.last_price {
                    events.push(MarketEvent::Tick(
                        Tick::trade(symbol, received_at, price)
                            .with_book(book.bids.clone(), book.asks.clone()),
                    ));
                }
            }
        }
        events
    }

    fn flush(&mut self, now: DateTime<Utc>) -> Vec<MarketEvent> {
        self.bars
            .flush(now.timestamp_millis())
            .into_iter()
            .map(MarketEvent::Bar)
            .collect()
    }
}

/// Streaming feed of the broker.
pub struct WsFeed {
    url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    settings: FeedSettings,
}

impl WsFeed {
    pub fn new(url: impl Into<String>, tokens: Arc<dyn AccessTokenProvider>, settings: FeedSettings) -> Self {
        Self {
            url: url.into(),
            tokens,
            settings,
        }
    }
}

#[async_trait]
impl MarketDataFeed for WsFeed {
    async fn subscribe(&self, symbols: &[String]) -> Result<mpsc::Receiver<MarketEvent>, DataFeedError> {
        if symbols.is_empty() {
            return Err(DataFeedError::Subscribe("no symbols".to_string()));
        }
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let session = FeedSession {
            url: self.url.clone(),
            tokens: Arc::clone(&self.tokens),
            settings: self.settings.clone(),
            symbols: symbols.to_vec(),
            tx,
        };
        tokio::spawn(session.run());
        Ok(rx)
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Reconnect delay, doubling from the initial value up to the cap.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(settings: &FeedSettings) -> Self {
        let max = Duration::from_millis(settings.reconnect_max_ms);
        let initial = Duration::from_millis(settings.reconnect_initial_ms).min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }
}

enum SessionEnd {
    /// The consumer dropped its receiver
    Closed,
    Disconnected(String),
}

struct FeedSession {
    url: String,
    tokens: Arc<dyn AccessTokenProvider>,
    settings: FeedSettings,
    symbols: Vec<String>,
    tx: mpsc::Sender<MarketEvent>,
}

impl FeedSession {
    async fn run(self) {
        let mut processor = FrameProcessor::new();
        let mut backoff = Backoff::new(&self.settings);

        loop {
            let reason = match self.connect_and_stream(&mut processor).await {
                Ok(SessionEnd::Closed) => {
                    debug!("Feed consumer gone, stopping");
                    return;
                }
                Ok(SessionEnd::Disconnected(reason)) => {
                    // A session that got going resets the backoff
                    backoff.reset();
                    reason
                }
                Err(e) => {
                    if let DataFeedError::Auth(_) = e {
                        self.tokens.invalidate().await;
                    }
                    e.to_string()
                }
            };

            let delay = backoff.next_delay();
            warn!("Market data disconnected: {}, reconnecting in {:?}", reason, delay);
            if self
                .tx
                .send(MarketEvent::Disconnected { reason })
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(&self, processor: &mut FrameProcessor) -> Result<SessionEnd, DataFeedError> {
        let token = self.tokens.bearer_token().await?;
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| DataFeedError::Connection(e.to_string()))?;
        let header = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| DataFeedError::Connection(e.to_string()))?;
        request.headers_mut().insert("authorization", header);

        let (ws, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| DataFeedError::Connection(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let subscribe = serde_json::to_string(&subscribe_message(&self.symbols))
            .map_err(|e| DataFeedError::Subscribe(e.to_string()))?;
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| DataFeedError::Subscribe(e.to_string()))?;
        info!("Subscribed to {} symbols at {}", self.symbols.len(), self.url);

        if self.tx.send(MarketEvent::Connected).await.is_err() {
            return Ok(SessionEnd::Closed);
        }

        let mut flush = tokio::time::interval(Duration::from_millis(
            self.settings.bar_flush_interval_ms.max(1),
        ));

        loop {
            let events = tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                        Ok(frame) => processor.process(frame, Utc::now()),
                        Err(e) => {
                            debug!("Ignoring frame: {}", e);
                            Vec::new()
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return Ok(SessionEnd::Disconnected(e.to_string()));
                        }
                        Vec::new()
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by server: {} {}", f.code, f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Ok(SessionEnd::Disconnected(reason));
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        return Ok(SessionEnd::Disconnected(e.to_string()));
                    }
                    None => return Ok(SessionEnd::Disconnected("stream ended".to_string())),
                },
                _ = flush.tick() => processor.flush(Utc::now()),
            };

            for event in events {
                if self.tx.send(event).await.is_err() {
                    return Ok(SessionEnd::Closed);
                }
            }
        }
    }
}
