//! Market mode classifier thresholds

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendFilterConfig {
    /// ADX period (default: 14)
    pub adx_period: usize,
    /// ADX above this (with a steep enough slope) means TREND (default: 25)
    pub adx_trend_threshold: f64,
    /// ADX below this means RANGE (default: 20)
    pub adx_range_threshold: f64,
    /// EMA periods whose slopes are averaged (default: [20, 50])
    pub ema_periods: Vec<usize>,
    /// Minimum absolute averaged EMA slope in percent (default: 0.5)
    pub ema_slope_threshold: f64,
    /// Bars over which EMA slope is measured (default: 5)
    pub slope_lookback: usize,
}

impl Default for TrendFilterConfig {
    fn default() -> Self {
        TrendFilterConfig {
            adx_period: 14,
            adx_trend_threshold: 25.0,
            adx_range_threshold: 20.0,
            ema_periods: vec![20, 50],
            ema_slope_threshold: 0.5,
            slope_lookback: 5,
        }
    }
}

impl TrendFilterConfig {
    /// Bars of history needed before ADX and every EMA slope are meaningful
    pub fn required_history(&self) -> usize {
        let ema = self
            .ema_periods
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            + self.slope_lookback;
        (self.adx_period * 2).max(ema)
    }
}
