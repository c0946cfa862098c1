//! Momentum indicators.

use trading_core::error::IndicatorError;
use trading_core::traits::{Indicator, StreamingIndicator};

/// RSI from Wilder-smoothed average gain and loss.
#[inline]
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

/// Relative Strength Index (RSI).
///
/// Measures the speed and magnitude of recent price changes
/// to evaluate overbought or oversold conditions.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
}

impl Rsi {
    /// Create a new RSI indicator.
    ///
    /// Common periods are 14 (default) or 9.
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "RSI period must be greater than 0".to_string(),
            ));
        }
        Ok(Self { period })
    }

    /// Calculate using Wilder's smoothing method.
    fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
        if values.len() < period {
            return vec![];
        }

        let mut result = Vec::with_capacity(values.len() - period + 1);
        let period_f64 = period as f64;

        // Seed with the simple mean of the first `period` values
        let mut avg: f64 = values[..period].iter().sum::<f64>() / period_f64;
        result.push(avg);

        // avg = (prev_avg * (period-1) + value) / period
        for &value in &values[period..] {
            avg = (avg * (period_f64 - 1.0) + value) / period_f64;
            result.push(avg);
        }

        result
    }
}

impl Default for Rsi {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn calculate(&self, data: &[f64]) -> Vec<f64> {
        if data.len() <= self.period {
            return vec![];
        }

        let (gains, losses): (Vec<f64>, Vec<f64>) = data
            .windows(2)
            .map(|w| {
                let change = w[1] - w[0];
                if change > 0.0 {
                    (change, 0.0)
                } else {
                    (0.0, -change)
                }
            })
            .unzip();

        let avg_gains = Self::wilder_smooth(&gains, self.period);
        let avg_losses = Self::wilder_smooth(&losses, self.period);

        avg_gains
            .iter()
            .zip(avg_losses.iter())
            .map(|(&gain, &loss)| rsi_value(gain, loss))
            .collect()
    }

    // One delta per period needs one extra close
    fn lookback(&self) -> usize {
        self.period + 1
    }
}

/// Incremental RSI. Produces the same values as [`Rsi`] once `period`
/// deltas have been seen.
#[derive(Debug, Clone)]
pub struct StreamingRsi {
    period: usize,
    prev: Option<f64>,
    deltas: usize,
    gain_sum: f64,
    loss_sum: f64,
    avg_gain: f64,
    avg_loss: f64,
}

impl StreamingRsi {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::InvalidParameter(
                "RSI period must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            period,
            prev: None,
            deltas: 0,
            gain_sum: 0.0,
            loss_sum: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        })
    }
}

impl StreamingIndicator for StreamingRsi {
    type Output = f64;

    fn push(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev.replace(close)?;

        let change = close - prev;
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        let period = self.period as f64;
        self.deltas += 1;

        if self.deltas < self.period {
            self.gain_sum += gain;
            self.loss_sum += loss;
        } else if self.deltas == self.period {
            self.avg_gain = (self.gain_sum + gain) / period;
            self.avg_loss = (self.loss_sum + loss) / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }

        self.value()
    }

    fn value(&self) -> Option<f64> {
        (self.deltas >= self.period).then(|| rsi_value(self.avg_gain, self.avg_loss))
    }

    fn clear(&mut self) {
        self.prev = None;
        self.deltas = 0;
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.avg_gain = 0.0;
        self.avg_loss = 0.0;
    }

    fn lookback(&self) -> usize {
        self.period + 1
    }
}
