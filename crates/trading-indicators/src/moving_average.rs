//! Moving averages.

use std::collections::VecDeque;
use trading_core::error::IndicatorError;
use trading_core::traits::{Indicator, StreamingIndicator};

fn check_period(period: usize) -> Result<usize, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidParameter(
            "SMA period must be greater than 0".to_string(),
        ));
    }
    Ok(period)
}

/// Simple moving average: arithmetic mean of the last `period` closes.
#[derive(Debug, Clone)]
pub struct Sma {
    pub(crate) period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        Ok(Self {
            period: check_period(period)?,
        })
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn calculate(&self, closes: &[f64]) -> Vec<f64> {
        if closes.len() < self.period {
            return vec![];
        }

        let n = self.period as f64;
        let mut sum: f64 = closes[..self.period].iter().sum();
        let mut out = Vec::with_capacity(closes.len() - self.period + 1);
        out.push(sum / n);

        for (old, new) in closes.iter().zip(&closes[self.period..]) {
            sum += new - old;
            out.push(sum / n);
        }
        out
    }

    fn lookback(&self) -> usize {
        self.period
    }

    // Only the newest window is summed
    fn latest(&self, closes: &[f64]) -> Result<f64, IndicatorError> {
        self.ensure_history(closes)?;
        let window = &closes[closes.len() - self.period..];
        Ok(window.iter().sum::<f64>() / self.period as f64)
    }
}

/// SMA over a sliding window of pushed closes.
#[derive(Debug, Clone)]
pub struct StreamingSma {
    period: usize,
    window: VecDeque<f64>,
    sum: f64,
}

impl StreamingSma {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        let period = check_period(period)?;
        Ok(Self {
            period,
            window: VecDeque::with_capacity(period),
            sum: 0.0,
        })
    }
}

impl StreamingIndicator for StreamingSma {
    type Output = f64;

    fn push(&mut self, close: f64) -> Option<f64> {
        if self.window.len() == self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
            }
        }
        self.window.push_back(close);
        self.sum += close;
        self.value()
    }

    fn value(&self) -> Option<f64> {
        (self.window.len() == self.period).then(|| self.sum / self.period as f64)
    }

    fn clear(&mut self) {
        self.window.clear();
        self.sum = 0.0;
    }

    fn lookback(&self) -> usize {
        self.period
    }
}
