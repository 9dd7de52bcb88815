//! Grid Manager
//!
//! Keeps a ladder of evenly spaced price levels around a base price and
//! decides buy eligibility against it. The ladder is replaced wholesale on
//! every reset; individual levels are never edited.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use super::config::GridTradingConfig;
use crate::snapshot::MarketSnapshot;
use crate::strategies::{EntryContext, EntryDecision, EntrySignal, ExitDecision, Strategy};
use crate::types::{Direction, ExitKind, Position, SubStrategy};

/// The current ladder. Owned exclusively by [`GridManager`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridState {
    pub base_price: f64,
    /// Strictly increasing; the middle entry equals `base_price`
    pub levels: Vec<f64>,
    pub initialized_at: DateTime<Utc>,
    /// BB width (percent of price) seen at the previous reset check
    pub last_bb_width: Option<f64>,
}

impl GridState {
    pub fn build(base_price: f64, level_count: usize, spacing_pct: f64, at: DateTime<Utc>) -> Self {
        let half = (level_count / 2) as i64;
        let levels = (-half..=half)
            .map(|i| base_price * (1.0 + i as f64 * spacing_pct / 100.0))
            .collect();
        Self {
            base_price,
            levels,
            initialized_at: at,
            last_bb_width: None,
        }
    }

    pub fn middle_index(&self) -> usize {
        self.levels.len() / 2
    }

    /// Closest level to `price`; ties go to the lower index
    pub fn nearest_level(&self, price: f64) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (index, &level) in self.levels.iter().enumerate() {
            let closer = match best {
                None => true,
                Some((_, current)) => (price - level).abs() < (price - current).abs(),
            };
            if closer {
                best = Some((index, level));
            }
        }
        best
    }
}

/// Why the ladder was rebuilt
#[derive(Debug, Clone, PartialEq)]
pub enum ResetReason {
    FirstRun,
    Expired { hours: f64 },
    BandWidthShift { change_pct: f64 },
    PriceDeviation { price: f64, low: f64, high: f64 },
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::FirstRun => write!(f, "first run"),
            ResetReason::Expired { hours } => write!(f, "grid expired after {:.1}h", hours),
            ResetReason::BandWidthShift { change_pct } => {
                write!(f, "BB width changed {:.1}%", change_pct)
            }
            ResetReason::PriceDeviation { price, low, high } => write!(
                f,
                "price {:.2} left the grid range [{:.2}, {:.2}]",
                price, low, high
            ),
        }
    }
}

/// Result of the Bollinger entry filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Pass(String),
    Block(String),
}

impl FilterVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, FilterVerdict::Pass(_))
    }
}

#[derive(Debug, Clone)]
pub struct GridManager {
    config: GridTradingConfig,
    max_positions: usize,
    state: Option<GridState>,
    initializations: usize,
}

impl GridManager {
    pub fn new(config: GridTradingConfig, max_positions: usize) -> Self {
        Self {
            config,
            max_positions,
            state: None,
            initializations: 0,
        }
    }

    pub fn config(&self) -> &GridTradingConfig {
        &self.config
    }

    pub fn state(&self) -> Option<&GridState> {
        self.state.as_ref()
    }

    /// How many times the ladder has been built
    pub fn initializations(&self) -> usize {
        self.initializations
    }

    /// Replace the ladder with one centred on `current_price`
    pub fn initialize(&mut self, current_price: f64, timestamp: DateTime<Utc>) {
        let state = GridState::build(
            current_price,
            self.config.grid_levels,
            self.config.grid_spacing,
            timestamp,
        );
        debug!(levels = ?state.levels, "Grid levels");
        self.state = Some(state);
        self.initializations += 1;
    }

    /// First matching reset trigger, in order: no ladder, expiry, band width
    /// shift, price outside the ladder. The band width check records the
    /// observed width whether or not it fires.
    pub fn should_reset(&mut self, snapshot: &MarketSnapshot) -> Option<ResetReason> {
        let Some(state) = self.state.as_mut() else {
            return Some(ResetReason::FirstRun);
        };

        let hours = (snapshot.timestamp - state.initialized_at).num_seconds() as f64 / 3600.0;
        if self.config.grid_reset_hours > 0.0 && hours >= self.config.grid_reset_hours {
            return Some(ResetReason::Expired { hours });
        }

        if let Some(width) = snapshot.bb_width_of_price() {
            if let Some(previous) = state.last_bb_width.replace(width) {
                if previous > 0.0 {
                    let change_pct = (width - previous).abs() / previous * 100.0;
                    if change_pct > self.config.bb_width_change_threshold {
                        return Some(ResetReason::BandWidthShift { change_pct });
                    }
                }
            }
        }

        let (Some(&lowest), Some(&highest)) = (state.levels.first(), state.levels.last()) else {
            return Some(ResetReason::FirstRun);
        };
        let deviation = self.config.price_deviation_reset_pct / 100.0;
        let low = lowest * (1.0 - deviation);
        let high = highest * (1.0 + deviation);
        let price = snapshot.current_price;
        if price < low || price > high {
            return Some(ResetReason::PriceDeviation { price, low, high });
        }

        None
    }

    pub fn nearest_level(&self, price: f64) -> Option<(usize, f64)> {
        self.state.as_ref()?.nearest_level(price)
    }

    /// Reject entries high up inside the Bollinger Bands. The allowed
    /// position scales with band width; missing or degenerate bands pass.
    pub fn bollinger_entry_filter(&self, snapshot: &MarketSnapshot) -> FilterVerdict {
        let cfg = &self.config;
        if !cfg.use_bb_entry_filter {
            return FilterVerdict::Pass("BB filter disabled".to_string());
        }
        let Some(position) = snapshot.bb_position() else {
            return FilterVerdict::Pass("BB data unavailable".to_string());
        };
        let width = snapshot.bb_width_of_price().unwrap_or(0.0);

        let multiplier = if width < cfg.bb_width_narrow_pct {
            cfg.bb_width_multiplier_narrow
        } else if width <= cfg.bb_width_wide_pct {
            cfg.bb_width_multiplier_mid
        } else {
            cfg.bb_width_multiplier_wide
        };
        let ceiling = (cfg.bb_entry_position_max * multiplier).min(cfg.bb_entry_position_cap);

        if position > ceiling {
            FilterVerdict::Block(format!(
                "BB position above ceiling ({:.2} > {:.2}, width {:.2}%)",
                position, ceiling, width
            ))
        } else {
            FilterVerdict::Pass(format!("BB position {:.2} <= {:.2}", position, ceiling))
        }
    }

    pub fn evaluate_entry(&mut self, snapshot: &MarketSnapshot) -> EntryDecision {
        let cfg = &self.config;
        let price = snapshot.current_price;

        if snapshot.active_positions >= self.max_positions {
            return EntryDecision::reject(format!(
                "max positions reached ({}/{})",
                snapshot.active_positions, self.max_positions
            ));
        }

        if let Some(ratio) = snapshot.atr_ratio() {
            if ratio > cfg.max_atr_threshold {
                return EntryDecision::reject(format!("high volatility (ATR ratio {:.2})", ratio));
            }
        }

        if let FilterVerdict::Block(reason) = self.bollinger_entry_filter(snapshot) {
            return EntryDecision::Reject(reason);
        }

        if let Some(reason) = self.should_reset(snapshot) {
            info!(%reason, price, "Resetting grid");
            self.initialize(price, snapshot.timestamp);
        }

        let Some(state) = self.state.as_ref() else {
            return EntryDecision::reject("grid not initialized");
        };
        let Some((index, level)) = state.nearest_level(price) else {
            return EntryDecision::reject("grid has no levels");
        };

        let distance_pct = (price - level) / level * 100.0;
        if distance_pct < -self.config.entry_band_below_pct
            || distance_pct > self.config.entry_band_above_pct
        {
            return EntryDecision::reject(format!(
                "price away from grid level ({:+.2}%, level {})",
                distance_pct, index
            ));
        }

        if index > state.middle_index() {
            return EntryDecision::reject(format!("grid level in upper half (level {})", index));
        }

        EntryDecision::Enter(EntrySignal {
            sub_strategy: SubStrategy::Grid,
            direction: Direction::Long,
            grid_level: Some(index),
            target_profit: self.config.profit_target.target_for(self.config.grid_spacing),
            reason: format!("grid level {} at {:.2}", index, level),
        })
    }

    pub fn evaluate_exit(
        &self,
        position: &Position,
        snapshot: &MarketSnapshot,
        holding_minutes: f64,
    ) -> ExitDecision {
        let cfg = &self.config;
        let price = snapshot.current_price;
        let profit = position.profit_rate(price);

        if profit <= cfg.single_position_stop_loss {
            return ExitDecision::close(ExitKind::StopLoss, format!("stop loss ({:.2}%)", profit));
        }

        let target = position.target_profit.unwrap_or(cfg.single_grid_profit);
        if profit >= target {
            return ExitDecision::close(
                ExitKind::TakeProfit,
                format!("take profit ({:.2}% >= {:.2}%)", profit, target),
            );
        }

        if cfg.total_stop_loss != 0.0 && snapshot.total_profit_rate <= cfg.total_stop_loss {
            return ExitDecision::close(
                ExitKind::StopLoss,
                format!("portfolio stop ({:.2}%)", snapshot.total_profit_rate),
            );
        }

        if let (Some(level), Some(state)) = (position.entry_grid_level, self.state.as_ref()) {
            if let Some(&next) = state.levels.get(level + 1) {
                if price >= next {
                    return ExitDecision::close(
                        ExitKind::TakeProfit,
                        format!("next grid level {} reached ({:.2})", level + 1, next),
                    );
                }
            }
        }

        if let Some(ratio) = snapshot.atr_ratio() {
            if ratio >= cfg.volatility_exit_ratio {
                if profit >= cfg.volatility_exit_profit {
                    return ExitDecision::close(
                        ExitKind::TakeProfit,
                        format!("volatility spike, locking {:.2}%", profit),
                    );
                }
                if profit < cfg.volatility_exit_loss {
                    return ExitDecision::close(
                        ExitKind::StopLoss,
                        format!("volatility spike, cutting {:.2}%", profit),
                    );
                }
            }
        }

        if cfg.long_hold_minutes > 0
            && holding_minutes >= cfg.long_hold_minutes as f64
            && profit <= cfg.long_hold_loss_threshold
        {
            return ExitDecision::close(
                ExitKind::StopLoss,
                format!("held {:.0} min at {:.2}%", holding_minutes, profit),
            );
        }

        ExitDecision::Hold
    }
}

impl Strategy for GridManager {
    fn name(&self) -> &'static str {
        "grid_trading"
    }

    fn sub_strategy(&self) -> SubStrategy {
        SubStrategy::Grid
    }

    fn entry_check(&mut self, ctx: &EntryContext<'_>) -> EntryDecision {
        self.evaluate_entry(ctx.snapshot)
    }

    fn exit_check(
        &self,
        position: &mut Position,
        snapshot: &MarketSnapshot,
        holding_minutes: f64,
    ) -> ExitDecision {
        self.evaluate_exit(position, snapshot, holding_minutes)
    }
}
