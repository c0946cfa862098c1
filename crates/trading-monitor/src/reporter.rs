//! Periodic position report.
//!
//! The reporter only reads published engine snapshots; it never sends
//! events to the engine.

use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;
use trading_core::types::{PositionState, SymbolPosition};
use trading_engine::{EngineHandle, EngineSnapshot};

/// One line of the report.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionLine {
    pub symbol: String,
    pub state: PositionState,
    pub quantity: u64,
    pub average_entry_price: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub rsi: Option<f64>,
}

/// Totals over all symbols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportSummary {
    pub lines: Vec<PositionLine>,
    pub open_positions: usize,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// Build the report of a snapshot.
pub fn summarize(snapshot: &EngineSnapshot) -> ReportSummary {
    let mut summary = ReportSummary::default();
    for position in &snapshot.positions {
        let line = line_for(position, snapshot);
        if line.state != PositionState::Flat {
            summary.open_positions += 1;
        }
        summary.unrealized_pnl += line.unrealized_pnl;
        summary.realized_pnl += line.realized_pnl;
        summary.lines.push(line);
    }
    summary
}

fn line_for(position: &SymbolPosition, snapshot: &EngineSnapshot) -> PositionLine {
    PositionLine {
        symbol: position.symbol.clone(),
        state: position.state,
        quantity: position.total_quantity,
        average_entry_price: position.average_entry_price,
        last_price: position.last_price,
        unrealized_pnl: position.unrealized_pnl(),
        realized_pnl: position.realized_pnl,
        rsi: snapshot
            .indicators
            .get(&position.symbol)
            .and_then(|i| i.momentum)
            .map(|m| m.rsi),
    }
}

/// Logs the engine snapshot on a fixed interval.
pub struct PositionReporter {
    handle: EngineHandle,
    period: Duration,
}

impl PositionReporter {
    pub fn new(handle: EngineHandle, period: Duration) -> Self {
        Self { handle, period }
    }

    /// Log once per period until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                _ = ticker.tick() => self.report(),
            }
        }
    }

    fn report(&self) {
        let snapshot = self.handle.snapshot();
        let summary = summarize(&snapshot);
        info!(
            running = snapshot.running,
            open_positions = summary.open_positions,
            unrealized_pnl = %summary.unrealized_pnl,
            realized_pnl = %summary.realized_pnl,
            buying_power = ?snapshot.available_buying_power,
            "Position report"
        );
        for line in summary.lines.iter().filter(|l| l.state != PositionState::Flat) {
            info!(
                symbol = %line.symbol,
                state = %line.state,
                quantity = line.quantity,
                avg_entry = ?line.average_entry_price,
                last = ?line.last_price,
                unrealized_pnl = %line.unrealized_pnl,
                rsi = ?line.rsi,
                "Position"
            );
        }
    }
}
