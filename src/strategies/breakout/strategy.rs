//! Breakout Sub-strategy
//!
//! Trades volatility spikes in trending markets in the direction of the EMA
//! slope. Longs trail the running peak by a multiple of ATR; shorts trail the
//! running trough with a tighter multiple.

use super::config::BreakoutConfig;
use crate::snapshot::MarketSnapshot;
use crate::strategies::{EntryContext, EntryDecision, EntrySignal, ExitDecision, Strategy};
use crate::types::{Direction, ExitKind, MarketMode, Position, SubStrategy};

#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    config: BreakoutConfig,
    /// Minimum absolute averaged EMA slope, shared with the classifier
    slope_threshold: f64,
}

impl BreakoutStrategy {
    pub fn new(config: BreakoutConfig, slope_threshold: f64) -> Self {
        Self {
            config,
            slope_threshold,
        }
    }

    pub fn config(&self) -> &BreakoutConfig {
        &self.config
    }

    pub fn evaluate_entry(&self, snapshot: &MarketSnapshot, mode: MarketMode) -> EntryDecision {
        if mode != MarketMode::Trend {
            return EntryDecision::reject(format!("market not trending ({})", mode));
        }

        let (Some(std), Some(std_ma)) = (snapshot.close_std, snapshot.close_std_ma) else {
            return EntryDecision::reject("volatility history unavailable");
        };
        let spike_level = std_ma * self.config.volatility_spike_threshold;
        if std <= spike_level {
            return EntryDecision::reject(format!(
                "no volatility spike (std {:.4} <= {:.4})",
                std, spike_level
            ));
        }

        let Some(slope) = snapshot.ema_slope else {
            return EntryDecision::reject("EMA slope unavailable");
        };
        let direction = if slope > self.slope_threshold {
            Direction::Long
        } else if slope < -self.slope_threshold {
            if !self.config.allow_short {
                return EntryDecision::reject("short entries disabled");
            }
            Direction::Short
        } else {
            return EntryDecision::reject(format!("trend unclear (slope {:.3}%)", slope));
        };

        EntryDecision::Enter(EntrySignal {
            sub_strategy: SubStrategy::Breakout,
            direction,
            grid_level: None,
            target_profit: None,
            reason: format!(
                "breakout {} (std {:.4} > {:.4}, slope {:.3}%)",
                direction, std, spike_level, slope
            ),
        })
    }

    /// Updates the position's running extrema before testing the stops
    pub fn evaluate_exit(&self, position: &mut Position, snapshot: &MarketSnapshot) -> ExitDecision {
        let price = snapshot.current_price;
        let profit = position.profit_rate(price);

        match position.direction {
            Direction::Long => {
                position.peak_price = position.peak_price.max(price);
                if let Some(atr) = snapshot.atr {
                    let stop = position.peak_price - atr * self.config.long_trailing_atr;
                    if price <= stop {
                        let kind = if profit > 0.0 {
                            ExitKind::TakeProfit
                        } else {
                            ExitKind::StopLoss
                        };
                        return ExitDecision::close(
                            kind,
                            format!(
                                "trailing stop {:.2} from peak {:.2} ({:.2}%)",
                                stop, position.peak_price, profit
                            ),
                        );
                    }
                }
                if profit <= self.config.long_stop_loss_pct {
                    return ExitDecision::close(
                        ExitKind::StopLoss,
                        format!("breakout stop loss ({:.2}%)", profit),
                    );
                }
            }
            Direction::Short => {
                position.trough_price = position.trough_price.min(price);
                if let Some(atr) = snapshot.atr {
                    let stop = position.trough_price + atr * self.config.short_trailing_atr;
                    if price >= stop {
                        return ExitDecision::close(
                            ExitKind::StopLoss,
                            format!(
                                "short trailing stop {:.2} from trough {:.2} ({:.2}%)",
                                stop, position.trough_price, profit
                            ),
                        );
                    }
                }
                if profit >= self.config.short_take_profit_pct {
                    return ExitDecision::close(
                        ExitKind::TakeProfit,
                        format!("short take profit ({:.2}%)", profit),
                    );
                }
            }
        }

        ExitDecision::Hold
    }
}

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn sub_strategy(&self) -> SubStrategy {
        SubStrategy::Breakout
    }

    fn entry_check(&mut self, ctx: &EntryContext<'_>) -> EntryDecision {
        self.evaluate_entry(ctx.snapshot, ctx.mode)
    }

    fn exit_check(
        &self,
        position: &mut Position,
        snapshot: &MarketSnapshot,
        _holding_minutes: f64,
    ) -> ExitDecision {
        self.evaluate_exit(position, snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorSnapshot;
    use chrono::{TimeZone, Utc};

    fn strategy() -> BreakoutStrategy {
        BreakoutStrategy::new(BreakoutConfig::default(), 0.5)
    }

    fn position(direction: Direction, entry: f64) -> Position {
        Position {
            id: 7,
            sub_strategy: SubStrategy::Breakout,
            direction,
            entry_price: entry,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            quantity: 1.0,
            gross_amount: entry,
            amount: entry,
            entry_fee: 0.0,
            target_profit: None,
            entry_grid_level: None,
            peak_price: entry,
            trough_price: entry,
            entry_reason: String::new(),
            entry_snapshot: IndicatorSnapshot::default(),
        }
    }

    fn snapshot(price: f64, atr: Option<f64>) -> MarketSnapshot {
        let mut snap = MarketSnapshot::new(price, Utc::now());
        snap.atr = atr;
        snap
    }

    fn spiking(slope: f64) -> MarketSnapshot {
        let mut snap = MarketSnapshot::new(100.0, Utc::now());
        snap.close_std = Some(2.0);
        snap.close_std_ma = Some(1.0);
        snap.ema_slope = Some(slope);
        snap
    }

    #[test]
    fn test_entry_requires_trend_mode() {
        let decision = strategy().evaluate_entry(&spiking(1.0), MarketMode::Range);
        assert!(!decision.is_enter());
        let decision = strategy().evaluate_entry(&spiking(1.0), MarketMode::Neutral);
        assert!(!decision.is_enter());
    }

    #[test]
    fn test_entry_requires_volatility_spike() {
        let mut snap = spiking(1.0);
        snap.close_std = Some(1.5);
        assert!(!strategy().evaluate_entry(&snap, MarketMode::Trend).is_enter());
        snap.close_std = None;
        assert!(!strategy().evaluate_entry(&snap, MarketMode::Trend).is_enter());
    }

    #[test]
    fn test_entry_direction_from_slope() {
        let s = strategy();
        match s.evaluate_entry(&spiking(0.8), MarketMode::Trend) {
            EntryDecision::Enter(signal) => {
                assert_eq!(signal.direction, Direction::Long);
                assert_eq!(signal.sub_strategy, SubStrategy::Breakout);
                assert_eq!(signal.grid_level, None);
            }
            other => panic!("expected long, got {other:?}"),
        }
        match s.evaluate_entry(&spiking(-0.8), MarketMode::Trend) {
            EntryDecision::Enter(signal) => assert_eq!(signal.direction, Direction::Short),
            other => panic!("expected short, got {other:?}"),
        }
        assert!(matches!(
            s.evaluate_entry(&spiking(0.2), MarketMode::Trend),
            EntryDecision::Reject(reason) if reason.contains("trend unclear")
        ));
    }

    #[test]
    fn test_shorts_can_be_disabled() {
        let config = BreakoutConfig {
            allow_short: false,
            ..Default::default()
        };
        let s = BreakoutStrategy::new(config, 0.5);
        assert!(!s.evaluate_entry(&spiking(-0.8), MarketMode::Trend).is_enter());
    }

    #[test]
    fn test_long_trailing_stop_from_peak() {
        let s = strategy();
        let mut pos = position(Direction::Long, 100.0);

        assert_eq!(s.evaluate_exit(&mut pos, &snapshot(110.0, Some(2.0))), ExitDecision::Hold);
        assert_eq!(pos.peak_price, 110.0);
        assert_eq!(s.evaluate_exit(&mut pos, &snapshot(108.0, Some(2.0))), ExitDecision::Hold);
        assert_eq!(pos.peak_price, 110.0);

        let exit = s.evaluate_exit(&mut pos, &snapshot(107.0, Some(2.0)));
        assert!(matches!(exit, ExitDecision::Close { kind: ExitKind::TakeProfit, .. }));
    }

    #[test]
    fn test_long_hard_stop() {
        let s = strategy();
        let mut pos = position(Direction::Long, 100.0);
        // no ATR reading: only the hard stop applies
        assert_eq!(s.evaluate_exit(&mut pos, &snapshot(98.5, None)), ExitDecision::Hold);
        let exit = s.evaluate_exit(&mut pos, &snapshot(98.0, None));
        assert!(matches!(exit, ExitDecision::Close { kind: ExitKind::StopLoss, .. }));
    }

    #[test]
    fn test_short_trailing_stop_and_take_profit() {
        let s = strategy();
        let mut pos = position(Direction::Short, 100.0);

        assert_eq!(s.evaluate_exit(&mut pos, &snapshot(99.0, Some(2.0))), ExitDecision::Hold);
        assert_eq!(pos.trough_price, 99.0);
        let exit = s.evaluate_exit(&mut pos, &snapshot(100.0, Some(2.0)));
        assert!(matches!(exit, ExitDecision::Close { kind: ExitKind::StopLoss, .. }));

        let mut pos = position(Direction::Short, 100.0);
        let exit = s.evaluate_exit(&mut pos, &snapshot(98.0, Some(0.1)));
        assert!(matches!(exit, ExitDecision::Close { kind: ExitKind::TakeProfit, .. }));
    }
}
