//! Shared wiring of a streaming trading session.

use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use trading_broker::{Credentials, PaperGateway, RestGateway, TokenManager};
use trading_config::AppConfig;
use trading_core::traits::{AccessTokenProvider, HistorySource, MarketDataFeed, OrderGateway};
use trading_core::types::{MarketEvent, Timeframe};
use trading_data::{RestHistory, WsFeed};
use trading_engine::{
    forward_market_events, EngineEvent, EngineRuntime, TradingEngine, SIGNAL_TIMEFRAME,
};
use trading_monitor::{summarize, PositionReporter};

/// Authenticated connection to the broker.
pub struct BrokerConnection {
    pub client: Client,
    pub tokens: Arc<TokenManager>,
    refresher: JoinHandle<()>,
}

impl BrokerConnection {
    /// Read credentials, obtain a first token and keep it refreshed.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let broker = &config.broker;
        let credentials = Credentials::from_env(&broker.app_key_env, &broker.secret_key_env)
            .with_context(|| {
                format!(
                    "Set {} and {} to the broker app key and secret",
                    broker.app_key_env, broker.secret_key_env
                )
            })?;
        let client = RestGateway::http_client(broker.request_timeout())?;
        let tokens = Arc::new(match &broker.rest_url {
            Some(url) => TokenManager::with_token_url(
                format!("{}/oauth2/token", url),
                credentials,
                client.clone(),
            ),
            None => TokenManager::new(broker.server, credentials, client.clone()),
        });
        tokens
            .refresh()
            .await
            .context("Failed to obtain an access token")?;
        let refresher = Arc::clone(&tokens).spawn_refresher();
        info!("Authenticated with {} ({})", broker.rest_url(), broker.server);

        Ok(Self {
            client,
            tokens,
            refresher,
        })
    }

    pub fn provider(&self) -> Arc<dyn AccessTokenProvider> {
        self.tokens.clone()
    }

    /// Order gateway over the REST API.
    pub fn rest_gateway(&self, config: &AppConfig) -> RestGateway {
        RestGateway::new(config.broker.server, self.provider(), self.client.clone())
            .with_base_url(config.broker.rest_url())
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

/// Load closed bars for every symbol into the engine. Failures only skip
/// the affected symbol.
async fn seed_history(engine: &mut TradingEngine, history: &dyn HistorySource, config: &AppConfig) {
    let requests = [
        (Timeframe::Daily, config.engine.daily_history_bars),
        (SIGNAL_TIMEFRAME, config.engine.intraday_history_bars),
    ];
    for symbol in &config.engine.symbols {
        for (timeframe, count) in requests {
            match history.fetch_bars(symbol, timeframe, count).await {
                Ok(bars) => {
                    info!(symbol = %symbol, "Seeded {} {} bars", bars.len(), timeframe);
                    engine.handle(EngineEvent::History {
                        symbol: symbol.clone(),
                        timeframe,
                        bars,
                    });
                }
                Err(e) => warn!(symbol = %symbol, "No {} history: {}", timeframe, e),
            }
        }
    }
}

/// Mark the in-process broker with every streamed price before the engine
/// sees it.
fn forward_with_marks(
    mut feed: mpsc::Receiver<MarketEvent>,
    events: mpsc::Sender<EngineEvent>,
    paper: Arc<PaperGateway>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            if let MarketEvent::Tick(tick) = &event {
                paper.mark(&tick.symbol, tick.price);
            }
            if events.send(EngineEvent::Market(event)).await.is_err() {
                return;
            }
        }
        warn!("Market data feed closed");
    })
}

async fn wait_for_stop(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Run the engine against `gateway` on live market data until Ctrl-C.
///
/// With `paper` set, streamed prices also drive that in-process broker.
pub async fn run<G: OrderGateway + 'static>(
    config: &AppConfig,
    connection: &BrokerConnection,
    gateway: Arc<G>,
    paper: Option<Arc<PaperGateway>>,
) -> Result<()> {
    let mut engine = TradingEngine::new(config.strategy.clone(), config.engine.clone())
        .context("Failed to create engine")?;

    let history = RestHistory::new(
        config.broker.rest_url(),
        connection.provider(),
        connection.client.clone(),
    );
    seed_history(&mut engine, &history, config).await;

    let (runtime, handle) = EngineRuntime::new(engine, gateway);

    let feed = WsFeed::new(config.broker.ws_url(), connection.provider(), config.feed.clone());
    let market = feed
        .subscribe(&config.engine.symbols)
        .await
        .context("Failed to subscribe to market data")?;
    let forwarder = match paper {
        Some(paper) => forward_with_marks(market, handle.sender(), paper),
        None => forward_market_events(market, handle.sender()),
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let reporter = (config.app.report_interval_secs > 0).then(|| {
        let reporter = PositionReporter::new(
            handle.clone(),
            Duration::from_secs(config.app.report_interval_secs),
        );
        tokio::spawn(reporter.run(wait_for_stop(stop_rx.clone())))
    });
    let engine_task = tokio::spawn(runtime.run(wait_for_stop(stop_rx)));

    handle.start().await?;
    info!(
        "Trading {} symbols: {}",
        config.engine.symbols.len(),
        config.engine.symbols.join(", ")
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    stop_tx.send_replace(true);

    let snapshot = engine_task.await.context("Engine task failed")??;
    forwarder.abort();
    if let Some(reporter) = reporter {
        reporter.await.ok();
    }

    let summary = summarize(&snapshot);
    println!();
    println!("Open positions:  {}", summary.open_positions);
    println!("Unrealized P&L:  {}", summary.unrealized_pnl);
    println!("Realized P&L:    {}", summary.realized_pnl);
    for line in summary.lines {
        println!(
            "  {:<10} {:<15} qty {:>6}  avg {:?}",
            line.symbol,
            line.state.to_string(),
            line.quantity,
            line.average_entry_price
        );
    }
    Ok(())
}
