use tracing::warn;

use super::breakout::BreakoutStrategy;
use super::grid_trading::GridManager;
use super::hybrid_grid::MarketModeClassifier;
use super::{EntryContext, EntryDecision, ExitDecision, Strategy};
use crate::snapshot::MarketSnapshot;
use crate::types::{MarketMode, Position, SubStrategy};

/// Owns the sub-strategies of one engine and dispatches between them.
/// New entries follow the market mode; exits follow each position's tag.
#[derive(Debug, Clone)]
pub struct StrategyRouter {
    name: &'static str,
    grid: GridManager,
    breakout: Option<BreakoutStrategy>,
    classifier: Option<MarketModeClassifier>,
}

impl StrategyRouter {
    pub fn grid_only(grid: GridManager) -> Self {
        Self {
            name: "grid_trading",
            grid,
            breakout: None,
            classifier: None,
        }
    }

    pub fn hybrid(
        grid: GridManager,
        classifier: MarketModeClassifier,
        breakout: Option<BreakoutStrategy>,
    ) -> Self {
        Self {
            name: "hybrid_grid",
            grid,
            breakout,
            classifier: Some(classifier),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn has_breakout(&self) -> bool {
        self.breakout.is_some()
    }

    pub fn grid(&self) -> &GridManager {
        &self.grid
    }

    pub fn breakout(&self) -> Option<&BreakoutStrategy> {
        self.breakout.as_ref()
    }

    /// RANGE whenever there is no classifier or not enough history
    pub fn classify(&self, snapshot: &MarketSnapshot) -> MarketMode {
        self.classifier
            .as_ref()
            .map_or(MarketMode::Range, |c| c.classify_snapshot(snapshot))
    }

    /// TREND goes to the breakout strategy when one is configured; RANGE and
    /// NEUTRAL go to the grid.
    pub fn entry_check(&mut self, ctx: &EntryContext<'_>) -> EntryDecision {
        match (ctx.mode, self.breakout.as_mut()) {
            (MarketMode::Trend, Some(breakout)) => breakout.entry_check(ctx),
            _ => self.grid.entry_check(ctx),
        }
    }

    pub fn exit_check(
        &self,
        position: &mut Position,
        snapshot: &MarketSnapshot,
        holding_minutes: f64,
    ) -> ExitDecision {
        match (position.sub_strategy, self.breakout.as_ref()) {
            (SubStrategy::Breakout, Some(breakout)) => {
                breakout.exit_check(position, snapshot, holding_minutes)
            }
            (SubStrategy::Breakout, None) => {
                warn!(position = position.id, "Breakout position without a breakout strategy, using grid exits");
                self.grid.exit_check(position, snapshot, holding_minutes)
            }
            (SubStrategy::Grid, _) => self.grid.exit_check(position, snapshot, holding_minutes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::breakout::BreakoutConfig;
    use crate::strategies::grid_trading::GridTradingConfig;
    use crate::strategies::hybrid_grid::TrendFilterConfig;
    use crate::types::{Direction, ExitKind, IndicatorSnapshot};
    use chrono::{TimeZone, Utc};

    fn hybrid() -> StrategyRouter {
        StrategyRouter::hybrid(
            GridManager::new(GridTradingConfig::default(), 3),
            MarketModeClassifier::new(TrendFilterConfig::default(), 10),
            Some(BreakoutStrategy::new(BreakoutConfig::default(), 0.5)),
        )
    }

    fn trending_snapshot() -> MarketSnapshot {
        let mut snap = MarketSnapshot::new(100.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        snap.history_len = 200;
        snap.adx = Some(40.0);
        snap.ema_slope = Some(1.0);
        snap.close_std = Some(3.0);
        snap.close_std_ma = Some(1.0);
        snap
    }

    fn position(sub_strategy: SubStrategy) -> Position {
        Position {
            id: 1,
            sub_strategy,
            direction: Direction::Long,
            entry_price: 100.0,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            quantity: 1.0,
            gross_amount: 100.0,
            amount: 100.0,
            entry_fee: 0.0,
            target_profit: None,
            entry_grid_level: None,
            peak_price: 100.0,
            trough_price: 100.0,
            entry_reason: String::new(),
            entry_snapshot: IndicatorSnapshot::default(),
        }
    }

    #[test]
    fn test_grid_only_never_trends() {
        let router = StrategyRouter::grid_only(GridManager::new(GridTradingConfig::default(), 3));
        assert_eq!(router.classify(&trending_snapshot()), MarketMode::Range);
    }

    #[test]
    fn test_trend_entries_go_to_breakout() {
        let mut router = hybrid();
        let snap = trending_snapshot();
        let mode = router.classify(&snap);
        assert_eq!(mode, MarketMode::Trend);

        let ctx = EntryContext { snapshot: &snap, mode };
        match router.entry_check(&ctx) {
            EntryDecision::Enter(signal) => assert_eq!(signal.sub_strategy, SubStrategy::Breakout),
            other => panic!("expected breakout entry, got {other:?}"),
        }
        assert!(router.grid().state().is_none());
    }

    #[test]
    fn test_range_entries_go_to_grid() {
        let mut router = hybrid();
        let snap = MarketSnapshot::new(100.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let ctx = EntryContext { snapshot: &snap, mode: MarketMode::Neutral };
        match router.entry_check(&ctx) {
            EntryDecision::Enter(signal) => assert_eq!(signal.sub_strategy, SubStrategy::Grid),
            other => panic!("expected grid entry, got {other:?}"),
        }
    }

    #[test]
    fn test_exits_follow_position_tag() {
        let router = hybrid();
        let mut snap = MarketSnapshot::new(101.0, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        snap.atr = Some(5.0);

        // grid take-profit at +1%
        let mut grid_pos = position(SubStrategy::Grid);
        assert!(matches!(
            router.exit_check(&mut grid_pos, &snap, 60.0),
            ExitDecision::Close { kind: ExitKind::TakeProfit, .. }
        ));

        // breakout long only trails, +1% is not an exit
        let mut breakout_pos = position(SubStrategy::Breakout);
        assert_eq!(router.exit_check(&mut breakout_pos, &snap, 60.0), ExitDecision::Hold);
        assert_eq!(breakout_pos.peak_price, 101.0);
    }
}
