//! Strategy definition port.

use crate::domain::error::QuantlabError;
use crate::domain::strategy::StrategyConfig;

pub trait StrategyPort {
    /// Loads one strategy, rejecting unknown condition types and regime keys.
    fn load_strategy(&self) -> Result<StrategyConfig, QuantlabError>;
}
