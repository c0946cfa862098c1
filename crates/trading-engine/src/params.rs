//! Strategy parameters.

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trading_core::{error::StrategyError, traits::StrategyConfig};

/// Upper bound on distinct entry price levels.
pub const MAX_ENTRY_LEVELS: usize = 5;

/// How the entry quantity is distributed over the price levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuantitySplit {
    /// Same quantity per level, remainder to the highest levels
    #[default]
    Equal,
    /// Proportional to the weights, highest level first
    Weighted { weights: Vec<u32> },
}

/// Where the entry price levels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// Best bid and the following levels of the latest bid ladder
    #[default]
    OrderBook,
    /// Reference bid minus `i * step_pct`, rounded down to the tick size
    FixedStep { step_pct: Decimal },
}

/// Total entry quantity per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySizing {
    /// Fixed number of shares
    Shares { quantity: u64 },
    /// As many shares as `amount` buys at the reference price
    Notional { amount: Decimal },
}

impl Default for EntrySizing {
    fn default() -> Self {
        EntrySizing::Shares { quantity: 5 }
    }
}

/// Price the profit targets are measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfitBasis {
    #[default]
    AverageEntry,
    LastFill,
}

/// Order type used for profit-taking sales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExitPricing {
    #[default]
    Market,
    /// Limit at the current best bid, market if no book is known
    BestBid,
}

/// Local trading hours in which new entries may start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionWindow {
    pub enabled: bool,
    pub open: NaiveTime,
    pub close: NaiveTime,
    /// Offset of exchange local time from UTC
    pub utc_offset_minutes: i32,
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            enabled: true,
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(15, 25, 0).unwrap_or_default(),
            utc_offset_minutes: 9 * 60,
        }
    }
}

impl SessionWindow {
    /// Whether `at` falls inside the window in exchange local time.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(offset) = FixedOffset::east_opt(self.utc_offset_minutes * 60) else {
            return false;
        };
        let local = at.with_timezone(&offset).time();
        local >= self.open && local <= self.close
    }
}

/// Parameters of the trend-filtered RSI pullback strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Enter when intraday RSI is at or below this value
    pub rsi_entry_threshold: f64,
    /// Return that triggers the partial sale
    pub first_profit_target: Decimal,
    /// Return that triggers the sale of the remainder
    pub second_profit_target: Decimal,
    /// Share of the position sold at the first target
    pub first_sell_fraction: Decimal,
    pub entry_price_levels: usize,
    pub split: QuantitySplit,
    pub level_source: LevelSource,
    pub tick_size: Decimal,
    pub sizing: EntrySizing,
    pub profit_basis: ProfitBasis,
    pub exit_pricing: ExitPricing,
    /// Cancel entry orders still open this long after the cycle began (0 = never)
    pub entry_order_ttl_secs: u64,
    pub session: SessionWindow,
    pub short_ma_period: usize,
    pub long_ma_period: usize,
    pub rsi_period: usize,
    pub trend_requires_close_above_short_ma: bool,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_entry_threshold: 30.0,
            first_profit_target: dec!(0.02),
            second_profit_target: dec!(0.03),
            first_sell_fraction: dec!(0.5),
            entry_price_levels: 5,
            split: QuantitySplit::Equal,
            level_source: LevelSource::OrderBook,
            tick_size: dec!(1),
            sizing: EntrySizing::default(),
            profit_basis: ProfitBasis::AverageEntry,
            exit_pricing: ExitPricing::Market,
            entry_order_ttl_secs: 600,
            session: SessionWindow::default(),
            short_ma_period: 5,
            long_ma_period: 20,
            rsi_period: 14,
            trend_requires_close_above_short_ma: false,
        }
    }
}

fn invalid(msg: impl Into<String>) -> StrategyError {
    StrategyError::InvalidConfig(msg.into())
}

impl StrategyConfig for StrategyParams {
    fn validate(&self) -> Result<(), StrategyError> {
        if !(self.rsi_entry_threshold > 0.0 && self.rsi_entry_threshold < 100.0) {
            return Err(invalid("RSI entry threshold must be between 0 and 100"));
        }
        if self.first_profit_target <= Decimal::ZERO {
            return Err(invalid("First profit target must be positive"));
        }
        if self.second_profit_target <= self.first_profit_target {
            return Err(invalid(
                "Second profit target must be greater than the first",
            ));
        }
        if self.first_sell_fraction <= Decimal::ZERO || self.first_sell_fraction > Decimal::ONE {
            return Err(invalid("First sell fraction must be in (0, 1]"));
        }
        if self.entry_price_levels == 0 || self.entry_price_levels > MAX_ENTRY_LEVELS {
            return Err(invalid(format!(
                "Entry price levels must be between 1 and {}",
                MAX_ENTRY_LEVELS
            )));
        }
        if let QuantitySplit::Weighted { weights } = &self.split {
            if weights.len() != self.entry_price_levels {
                return Err(invalid(format!(
                    "Expected {} split weights, got {}",
                    self.entry_price_levels,
                    weights.len()
                )));
            }
            if weights.iter().any(|w| *w == 0) {
                return Err(invalid("Split weights must be positive"));
            }
        }
        if let LevelSource::FixedStep { step_pct } = &self.level_source {
            if *step_pct <= Decimal::ZERO || *step_pct >= Decimal::ONE {
                return Err(invalid("Fixed step must be in (0, 1)"));
            }
        }
        if self.tick_size <= Decimal::ZERO {
            return Err(invalid("Tick size must be positive"));
        }
        match &self.sizing {
            EntrySizing::Shares { quantity } if *quantity == 0 => {
                return Err(invalid("Entry quantity must be at least 1"));
            }
            EntrySizing::Notional { amount } if *amount <= Decimal::ZERO => {
                return Err(invalid("Entry amount must be positive"));
            }
            _ => {}
        }
        if self.short_ma_period == 0 || self.short_ma_period >= self.long_ma_period {
            return Err(invalid("Short MA period must be positive and less than long"));
        }
        if self.rsi_period < 2 {
            return Err(invalid("RSI period must be at least 2"));
        }
        if self.session.enabled && self.session.open >= self.session.close {
            return Err(invalid("Session open must be before close"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults_are_valid() {
        let params = StrategyParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.rsi_entry_threshold, 30.0);
        assert_eq!(params.first_profit_target, dec!(0.02));
        assert_eq!(params.second_profit_target, dec!(0.03));
        assert_eq!(params.first_sell_fraction, dec!(0.5));
        assert_eq!(params.entry_price_levels, 5);
    }

    #[test]
    fn test_validation_errors() {
        let params = StrategyParams {
            second_profit_target: dec!(0.01),
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = StrategyParams {
            entry_price_levels: 6,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = StrategyParams {
            split: QuantitySplit::Weighted { weights: vec![1, 2] },
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = StrategyParams {
            sizing: EntrySizing::Shares { quantity: 0 },
            ..Default::default()
        };
        assert!(params.validate().is_err());

        let params = StrategyParams {
            first_sell_fraction: dec!(1.5),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_session_window() {
        let session = SessionWindow::default();
        // 00:30 UTC is 09:30 KST
        let open = Utc.with_ymd_and_hms(2024, 3, 4, 0, 30, 0).unwrap();
        // 06:30 UTC is 15:30 KST
        let closed = Utc.with_ymd_and_hms(2024, 3, 4, 6, 30, 0).unwrap();

        assert!(session.contains(open));
        assert!(!session.contains(closed));

        let always = SessionWindow {
            enabled: false,
            ..Default::default()
        };
        assert!(always.contains(closed));
    }

    #[test]
    fn test_deserialize_partial() {
        let params: StrategyParams = serde_json::from_str(
            r#"{"rsi_entry_threshold": 25.0, "split": {"weighted": {"weights": [1,1,2,3,3]}}}"#,
        )
        .unwrap();

        assert_eq!(params.rsi_entry_threshold, 25.0);
        assert_eq!(
            params.split,
            QuantitySplit::Weighted {
                weights: vec![1, 1, 2, 3, 3]
            }
        );
        assert_eq!(params.long_ma_period, 20);
        assert!(params.validate().is_ok());
    }
}
