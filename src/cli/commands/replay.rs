//! Replay command implementation.

use anyhow::{Context, Result};
use chrono::FixedOffset;
use tracing::info;
use trading_config::AppConfig;
use trading_data::load_replay;
use trading_engine::TradingEngine;
use trading_replay::{ReplayConfig, ReplayEngine};

use crate::cli::ReplayArgs;

pub async fn run(args: ReplayArgs, mut config: AppConfig) -> Result<()> {
    super::apply_symbols(&mut config, &args.symbols)?;
    if !args.data.is_dir() {
        anyhow::bail!(
            "Data path '{}' is not a directory. Provide a directory with {{symbol}}_daily.csv and {{symbol}}_10m.csv files (e.g. --data ./data)",
            args.data.display()
        );
    }

    let offset = FixedOffset::east_opt(config.strategy.session.utc_offset_minutes * 60)
        .context("Invalid session UTC offset")?;
    let events = load_replay(&args.data, &config.engine.symbols, offset)
        .with_context(|| format!("Failed to load bars from {}", args.data.display()))?;
    info!("Loaded {} bars for {} symbols", events.len(), config.engine.symbols.len());

    let engine = TradingEngine::new(config.strategy.clone(), config.engine.clone())
        .context("Failed to create engine")?;
    let replay_config = ReplayConfig {
        initial_cash: args.cash.unwrap_or(config.broker.paper_cash),
        commission: args.commission,
        slippage_pct: args.slippage,
    };
    let report = ReplayEngine::new(replay_config).run(engine, events).await;

    match args.output.as_str() {
        "json" => println!("{}", report.to_json()?),
        _ => println!("{}", report.summary()),
    }

    if let Some(save_path) = &args.save {
        std::fs::write(save_path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", save_path.display()))?;
        info!("Report saved to {:?}", save_path);
    }

    Ok(())
}
