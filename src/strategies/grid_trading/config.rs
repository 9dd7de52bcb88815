//! Grid Trading Configuration
//!
//! Percentages are expressed in percent units (1.0 = 1%).

use serde::{Deserialize, Serialize};

/// Grid ladder, entry filters and exit thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridTradingConfig {
    // Ladder
    /// Number of levels in the ladder, odd (default: 5)
    pub grid_levels: usize,
    /// Spacing between adjacent levels in percent (default: 1.0)
    pub grid_spacing: f64,

    // Reset triggers
    /// Rebuild the ladder after this many hours, 0 disables (default: 24)
    pub grid_reset_hours: f64,
    /// Rebuild when BB width moves by more than this percent (default: 30)
    pub bb_width_change_threshold: f64,
    /// Rebuild when price strays this far outside the ladder, in percent (default: 15)
    pub price_deviation_reset_pct: f64,

    // Entry gates
    /// Reject entries when ATR exceeds this fraction of its moving average (default: 0.8)
    pub max_atr_threshold: f64,
    /// Proximity band below the nearest level, in percent (default: 0.2)
    pub entry_band_below_pct: f64,
    /// Proximity band above the nearest level, in percent (default: 0.1)
    pub entry_band_above_pct: f64,
    pub use_bb_entry_filter: bool,
    /// Base ceiling for the price position inside the bands (default: 0.4)
    pub bb_entry_position_max: f64,
    /// Band width (percent of price) below which bands count as narrow (default: 4)
    pub bb_width_narrow_pct: f64,
    /// Band width (percent of price) above which bands count as wide (default: 8)
    pub bb_width_wide_pct: f64,
    pub bb_width_multiplier_narrow: f64,
    pub bb_width_multiplier_mid: f64,
    pub bb_width_multiplier_wide: f64,
    /// Absolute ceiling after scaling (default: 0.65)
    pub bb_entry_position_cap: f64,

    // Exits
    pub single_position_stop_loss: f64,
    pub single_grid_profit: f64,
    /// Portfolio-wide stop on the summed open profit rate, 0 disables
    pub total_stop_loss: f64,
    /// ATR / ATR moving average ratio that triggers the volatility exit (default: 1.5)
    pub volatility_exit_ratio: f64,
    pub volatility_exit_profit: f64,
    pub volatility_exit_loss: f64,
    /// Maximum holding time in minutes, 0 disables
    pub long_hold_minutes: i64,
    pub long_hold_loss_threshold: f64,

    pub profit_target: DynamicTargetConfig,
}

impl Default for GridTradingConfig {
    fn default() -> Self {
        GridTradingConfig {
            grid_levels: 5,
            grid_spacing: 1.0,

            grid_reset_hours: 24.0,
            bb_width_change_threshold: 30.0,
            price_deviation_reset_pct: 15.0,

            max_atr_threshold: 0.8,
            entry_band_below_pct: 0.2,
            entry_band_above_pct: 0.1,
            use_bb_entry_filter: true,
            bb_entry_position_max: 0.4,
            bb_width_narrow_pct: 4.0,
            bb_width_wide_pct: 8.0,
            bb_width_multiplier_narrow: 1.0,
            bb_width_multiplier_mid: 1.25,
            bb_width_multiplier_wide: 1.5,
            bb_entry_position_cap: 0.65,

            single_position_stop_loss: -1.5,
            single_grid_profit: 1.0,
            total_stop_loss: 0.0,
            volatility_exit_ratio: 1.5,
            volatility_exit_profit: 0.5,
            volatility_exit_loss: -0.3,
            long_hold_minutes: 0,
            long_hold_loss_threshold: -1.0,

            profit_target: DynamicTargetConfig::default(),
        }
    }
}

/// Per-entry take-profit derived from the grid spacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicTargetConfig {
    pub enabled: bool,
    /// Target expressed in grid steps (default: 1)
    pub profit_target_grid_levels: f64,
    pub min_profit_target_pct: f64,
    pub max_profit_target_pct: f64,
}

impl Default for DynamicTargetConfig {
    fn default() -> Self {
        DynamicTargetConfig {
            enabled: false,
            profit_target_grid_levels: 1.0,
            min_profit_target_pct: 0.5,
            max_profit_target_pct: 1.5,
        }
    }
}

impl DynamicTargetConfig {
    /// Target profit in percent for a ladder with `grid_spacing`
    pub fn target_for(&self, grid_spacing: f64) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        let target = grid_spacing * self.profit_target_grid_levels;
        Some(target.max(self.min_profit_target_pct).min(self.max_profit_target_pct))
    }
}
