//! Paper trading command implementation.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use trading_broker::{PaperGateway, RetryingGateway, Server};
use trading_config::AppConfig;

use super::session::{self, BrokerConnection};
use crate::cli::PaperArgs;

pub async fn run(args: PaperArgs, mut config: AppConfig) -> Result<()> {
    super::apply_symbols(&mut config, &args.symbols)?;

    if args.local {
        // Market data still streams from the configured server
        let cash = args.cash.unwrap_or(config.broker.paper_cash);
        info!("Starting local paper trading with {} cash", cash);
        let connection = BrokerConnection::open(&config).await?;
        let paper = Arc::new(PaperGateway::new(cash));
        session::run(&config, &connection, Arc::clone(&paper), Some(paper)).await?;
        return Ok(());
    }

    config.broker.server = Server::Paper;
    info!("Starting paper trading on {}", config.broker.rest_url());
    let connection = BrokerConnection::open(&config).await?;
    let gateway = Arc::new(RetryingGateway::new(
        connection.rest_gateway(&config),
        config.broker.retry.clone(),
    ));
    session::run(&config, &connection, gateway, None).await
}
