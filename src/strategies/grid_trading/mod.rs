//! Grid Trading Strategy
//!
//! Buys dips onto the lower half of a price ladder and sells one step up.

pub mod config;
mod strategy;

pub use config::{DynamicTargetConfig, GridTradingConfig};
pub use strategy::{FilterVerdict, GridManager, GridState, ResetReason};

use crate::error::ConfigError;
use crate::strategies::StrategyRouter;
use crate::Config;

/// Grid-only stack: every entry and exit goes through the ladder
pub fn create(config: &Config) -> Result<StrategyRouter, ConfigError> {
    config.validate()?;
    let grid = GridManager::new(config.grid.clone(), config.trading.max_positions);
    Ok(StrategyRouter::grid_only(grid))
}
