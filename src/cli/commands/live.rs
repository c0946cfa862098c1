//! Live trading command implementation.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use trading_broker::{RetryingGateway, Server};
use trading_config::AppConfig;

use super::session::{self, BrokerConnection};
use crate::cli::LiveArgs;

pub async fn run(args: LiveArgs, mut config: AppConfig) -> Result<()> {
    super::apply_symbols(&mut config, &args.symbols)?;
    if config.broker.server != Server::Production {
        warn!("Broker server is '{}', orders will not reach the market", config.broker.server);
    }
    info!("Starting live trading on {}", config.broker.rest_url());

    let connection = BrokerConnection::open(&config).await?;
    let gateway = Arc::new(RetryingGateway::new(
        connection.rest_gateway(&config),
        config.broker.retry.clone(),
    ));
    session::run(&config, &connection, gateway, None).await
}
