//! Hybrid Grid Strategy
//!
//! Grid trading in ranging markets, breakout trading while trending. The
//! classifier picks the sub-strategy for new entries; open positions keep
//! the exit rules of the sub-strategy that opened them.

mod classifier;
pub mod config;

pub use classifier::{classify, MarketModeClassifier};
pub use config::TrendFilterConfig;

use crate::error::ConfigError;
use crate::strategies::breakout::BreakoutStrategy;
use crate::strategies::grid_trading::GridManager;
use crate::strategies::StrategyRouter;
use crate::Config;

pub fn create(config: &Config) -> Result<StrategyRouter, ConfigError> {
    config.validate()?;
    let grid = GridManager::new(config.grid.clone(), config.trading.max_positions);
    let classifier = MarketModeClassifier::new(
        config.trend_filter.clone(),
        config.breakout.std_period,
    );
    let breakout = config.breakout.enabled.then(|| {
        BreakoutStrategy::new(
            config.breakout.clone(),
            config.trend_filter.ema_slope_threshold,
        )
    });
    Ok(StrategyRouter::hybrid(grid, classifier, breakout))
}
