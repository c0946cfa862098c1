//! Indicator snapshots derived from closed bars.
//!
//! Snapshots are recomputed from the full closed-bar history whenever a new
//! bar closes, so a decision always reflects the latest closed bar.

use serde::{Deserialize, Serialize};
use trading_core::error::IndicatorError;
use trading_core::traits::Indicator;
use trading_core::types::BarSeries;

use crate::{Rsi, Sma};

/// Daily trend filter values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSnapshot {
    pub short_ma: f64,
    pub long_ma: f64,
    /// Close of the bar the averages were computed at
    pub close: f64,
    /// Open time of that bar, Unix milliseconds
    pub bar_timestamp: i64,
}

impl TrendSnapshot {
    /// Short average above the long one, optionally also requiring the close
    /// above the short average.
    pub fn is_uptrend(&self, require_close_above_short: bool) -> bool {
        let crossed = self.short_ma > self.long_ma;
        if require_close_above_short {
            crossed && self.close > self.short_ma
        } else {
            crossed
        }
    }
}

/// Intraday momentum values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentumSnapshot {
    pub rsi: f64,
    pub bar_timestamp: i64,
}

/// Latest snapshot per timeframe for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub trend: Option<TrendSnapshot>,
    pub momentum: Option<MomentumSnapshot>,
}

/// Computes the trend and momentum snapshots with fixed periods.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    short_ma: Sma,
    long_ma: Sma,
    rsi: Rsi,
}

impl IndicatorEngine {
    pub fn new(
        short_period: usize,
        long_period: usize,
        rsi_period: usize,
    ) -> Result<Self, IndicatorError> {
        if short_period >= long_period {
            return Err(IndicatorError::InvalidParameter(format!(
                "short MA period {} must be less than long MA period {}",
                short_period, long_period
            )));
        }
        Ok(Self {
            short_ma: Sma::new(short_period)?,
            long_ma: Sma::new(long_period)?,
            rsi: Rsi::new(rsi_period)?,
        })
    }

    /// Short/long moving averages of daily closes.
    pub fn trend(&self, daily: &BarSeries) -> Result<TrendSnapshot, IndicatorError> {
        let closes = daily.closes();
        let long_ma = self.long_ma.latest(&closes)?;
        let short_ma = self.short_ma.latest(&closes)?;
        let last = daily.last().ok_or(IndicatorError::InsufficientHistory {
            required: 1,
            available: 0,
        })?;

        Ok(TrendSnapshot {
            short_ma,
            long_ma,
            close: last.close,
            bar_timestamp: last.timestamp,
        })
    }

    /// RSI of intraday closes.
    pub fn momentum(&self, intraday: &BarSeries) -> Result<MomentumSnapshot, IndicatorError> {
        let closes = intraday.closes();
        let rsi = self.rsi.latest(&closes)?;
        let bar_timestamp = intraday.last().map(|b| b.timestamp).unwrap_or_default();

        Ok(MomentumSnapshot { rsi, bar_timestamp })
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self {
            short_ma: Sma { period: 5 },
            long_ma: Sma { period: 20 },
            rsi: Rsi::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trading_core::types::{Bar, Timeframe};

    fn series(timeframe: Timeframe, closes: &[f64]) -> BarSeries {
        let mut series = BarSeries::new("005930".to_string(), timeframe);
        for (i, c) in closes.iter().enumerate() {
            series.push(Bar::new(i as i64 * timeframe.as_millis(), *c, *c, *c, *c, 100.0));
        }
        series
    }

    #[test]
    fn test_trend_uptrend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let snapshot = IndicatorEngine::default()
            .trend(&series(Timeframe::Daily, &closes))
            .unwrap();

        // Last five: 125..=129, last twenty: 110..=129
        assert!((snapshot.short_ma - 127.0).abs() < 1e-10);
        assert!((snapshot.long_ma - 119.5).abs() < 1e-10);
        assert!(snapshot.is_uptrend(false));
        assert!(snapshot.is_uptrend(true));
        assert_eq!(snapshot.bar_timestamp, 29 * Timeframe::Daily.as_millis());
    }

    #[test]
    fn test_close_filter() {
        let snapshot = TrendSnapshot {
            short_ma: 105.0,
            long_ma: 100.0,
            close: 104.0,
            bar_timestamp: 0,
        };
        assert!(snapshot.is_uptrend(false));
        assert!(!snapshot.is_uptrend(true));
    }

    #[test]
    fn test_trend_insufficient_history() {
        let closes: Vec<f64> = (0..19).map(|i| 100.0 + i as f64).collect();
        let err = IndicatorEngine::default()
            .trend(&series(Timeframe::Daily, &closes))
            .unwrap_err();

        assert_eq!(
            err,
            IndicatorError::InsufficientHistory {
                required: 20,
                available: 19
            }
        );
    }

    #[test]
    fn test_momentum_oversold() {
        let closes: Vec<f64> = (0..20).map(|i| 200.0 - i as f64).collect();
        let snapshot = IndicatorEngine::default()
            .momentum(&series(Timeframe::Minute10, &closes))
            .unwrap();

        assert!(snapshot.rsi < 1e-10);
    }

    #[test]
    fn test_invalid_periods() {
        assert!(IndicatorEngine::new(20, 5, 14).is_err());
        assert!(IndicatorEngine::new(5, 20, 0).is_err());
        assert!(IndicatorEngine::new(5, 20, 14).is_ok());
    }
}
