//! Strategy configuration trait.

use crate::error::StrategyError;

/// Configuration trait for strategy parameter sets.
pub trait StrategyConfig: Send + Sync + Clone + 'static {
    /// Validate the configuration.
    fn validate(&self) -> Result<(), StrategyError>;
}
