//! Replay report generation.

use serde::{Deserialize, Serialize};
use trading_core::types::SymbolPosition;

use crate::{ReplayConfig, ReplayStats};

/// Complete replay report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayReport {
    pub config: ReplayConfig,
    pub stats: ReplayStats,
    /// Engine positions after the last bar
    pub positions: Vec<SymbolPosition>,
}

impl ReplayReport {
    /// Generate a text summary.
    pub fn summary(&self) -> String {
        let mut s = String::new();

        s.push_str("═══════════════════════════════════════════════════════════\n");
        s.push_str("                      REPLAY REPORT                         \n");
        s.push_str("═══════════════════════════════════════════════════════════\n\n");

        s.push_str("PERFORMANCE\n");
        s.push_str("───────────────────────────────────────────────────────────\n");
        s.push_str(&format!("  Initial Cash:        {:.0}\n", self.stats.initial_cash));
        s.push_str(&format!("  Final Cash:          {:.0}\n", self.stats.final_cash));
        s.push_str(&format!("  Final Equity:        {:.0}\n", self.stats.final_equity));
        s.push_str(&format!("  Total Return:        {:.2}%\n", self.stats.total_return_pct));
        s.push_str(&format!("  Realized P&L:        {:.0}\n", self.stats.realized_pnl));
        s.push_str(&format!("  Max Drawdown:        {:.2}%\n", self.stats.max_drawdown_pct));
        s.push('\n');

        s.push_str("ORDERS\n");
        s.push_str("───────────────────────────────────────────────────────────\n");
        s.push_str(&format!("  Orders Placed:       {}\n", self.stats.orders_placed));
        s.push_str(&format!("  Orders Rejected:     {}\n", self.stats.orders_rejected));
        s.push_str(&format!("  Entry Cycles:        {}\n", self.stats.entry_cycles));
        s.push_str(&format!("  First Take-Profits:  {}\n", self.stats.first_take_profits));
        s.push_str(&format!("  Second Take-Profits: {}\n", self.stats.second_take_profits));
        s.push_str(&format!("  Fills:               {}\n", self.stats.trades.len()));
        s.push_str(&format!("  Winning Sales:       {}\n", self.stats.winning_sales()));
        s.push_str(&format!("  Losing Sales:        {}\n", self.stats.losing_sales()));
        s.push('\n');

        s.push_str("POSITIONS\n");
        s.push_str("───────────────────────────────────────────────────────────\n");
        for p in &self.positions {
            s.push_str(&format!(
                "  {:<10} {:<15} qty {:>6}  realized {:.0}\n",
                p.symbol,
                p.state.to_string(),
                p.total_quantity,
                p.realized_pnl
            ));
        }
        s.push('\n');

        s.push_str("EXECUTION\n");
        s.push_str("───────────────────────────────────────────────────────────\n");
        s.push_str(&format!("  Bars Processed:      {}\n", self.stats.bars_processed));
        s.push('\n');

        s.push_str("═══════════════════════════════════════════════════════════\n");

        s
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export the equity curve as CSV.
    pub fn equity_to_csv(&self) -> String {
        let mut csv = String::from("timestamp,equity\n");
        for (ts, equity) in &self.stats.equity_curve {
            csv.push_str(&format!("{},{}\n", ts, equity));
        }
        csv
    }
}
