//! Indicator traits.
//!
//! Both flavours consume closes oldest first. A batch [`Indicator`] is
//! recomputed from a bar series whenever a bar closes; a
//! [`StreamingIndicator`] folds one close at a time and must agree with its
//! batch counterpart once warm.

use crate::error::IndicatorError;

pub trait Indicator: Send + Sync {
    type Output: Copy;

    /// Every value the closes support, oldest first. Empty when the
    /// history is shorter than [`lookback`](Self::lookback).
    fn calculate(&self, closes: &[f64]) -> Vec<Self::Output>;

    /// Closes needed for the first value.
    fn lookback(&self) -> usize;

    fn ensure_history(&self, closes: &[f64]) -> Result<(), IndicatorError> {
        let required = self.lookback();
        if closes.len() < required {
            return Err(IndicatorError::InsufficientHistory {
                required,
                available: closes.len(),
            });
        }
        Ok(())
    }

    /// Value at the newest close.
    fn latest(&self, closes: &[f64]) -> Result<Self::Output, IndicatorError> {
        self.ensure_history(closes)?;
        self.calculate(closes)
            .last()
            .copied()
            .ok_or(IndicatorError::InsufficientHistory {
                required: self.lookback(),
                available: closes.len(),
            })
    }
}

pub trait StreamingIndicator: Send + Sync {
    type Output: Copy;

    /// Fold in the next close; `None` until warm.
    fn push(&mut self, close: f64) -> Option<Self::Output>;

    fn value(&self) -> Option<Self::Output>;

    /// Forget every close seen so far.
    fn clear(&mut self);

    fn lookback(&self) -> usize;

    fn is_warm(&self) -> bool {
        self.value().is_some()
    }

    /// Fold in a run of closes and return the value after the last one.
    fn extend_from(&mut self, closes: &[f64]) -> Option<Self::Output> {
        for &close in closes {
            self.push(close);
        }
        self.value()
    }
}
