//! Breakout Sub-strategy Configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutConfig {
    pub enabled: bool,
    /// Fraction of the normal per-trade notional (default: 0.33)
    pub position_fraction: f64,
    /// Window for the rolling standard deviation of closes (default: 50)
    pub std_period: usize,
    /// Rolling std must exceed its own rolling mean by this multiple (default: 1.5)
    pub volatility_spike_threshold: f64,
    /// Long trailing stop distance in ATR multiples (default: 1.5)
    pub long_trailing_atr: f64,
    /// Short trailing stop distance in ATR multiples (default: 0.5)
    pub short_trailing_atr: f64,
    /// Hard stop for longs in percent (default: -2.0)
    pub long_stop_loss_pct: f64,
    /// Fixed take-profit for shorts in percent (default: 2.0)
    pub short_take_profit_pct: f64,
    pub allow_short: bool,
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        BreakoutConfig {
            enabled: true,
            position_fraction: 0.33,
            std_period: 50,
            volatility_spike_threshold: 1.5,
            long_trailing_atr: 1.5,
            short_trailing_atr: 0.5,
            long_stop_loss_pct: -2.0,
            short_take_profit_pct: 2.0,
            allow_short: true,
        }
    }
}
