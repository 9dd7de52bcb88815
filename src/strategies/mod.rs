//! Trading Strategies Module
//!
//! Strategies implement [`Strategy`]. Composition, not inheritance, produces
//! the hybrid behaviour: a [`StrategyRouter`] owns independent grid and
//! breakout strategies and dispatches new entries by market mode and exits by
//! each position's stored sub-strategy tag.

pub mod breakout;
pub mod grid_trading;
pub mod hybrid_grid;
mod router;

pub use router::StrategyRouter;

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use crate::error::ConfigError;
use crate::snapshot::MarketSnapshot;
use crate::types::{Direction, ExitKind, MarketMode, Position, SubStrategy};
use crate::Config;

/// Inputs to an entry evaluation
#[derive(Debug, Clone, Copy)]
pub struct EntryContext<'a> {
    pub snapshot: &'a MarketSnapshot,
    pub mode: MarketMode,
}

/// An accepted entry, sized later by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySignal {
    pub sub_strategy: SubStrategy,
    pub direction: Direction,
    pub grid_level: Option<usize>,
    pub target_profit: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryDecision {
    Enter(EntrySignal),
    Reject(String),
}

impl EntryDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        EntryDecision::Reject(reason.into())
    }

    pub fn is_enter(&self) -> bool {
        matches!(self, EntryDecision::Enter(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    Hold,
    Close { kind: ExitKind, reason: String },
}

impl ExitDecision {
    pub fn close(kind: ExitKind, reason: impl Into<String>) -> Self {
        ExitDecision::Close {
            kind,
            reason: reason.into(),
        }
    }

    pub fn should_close(&self) -> bool {
        matches!(self, ExitDecision::Close { .. })
    }
}

/// The contract every sub-strategy implements
pub trait Strategy: Send {
    fn name(&self) -> &'static str;

    /// Tag stored on positions this strategy opens
    fn sub_strategy(&self) -> SubStrategy;

    /// Evaluate a fresh entry. May update internal state (e.g. rebuild a grid).
    fn entry_check(&mut self, ctx: &EntryContext<'_>) -> EntryDecision;

    /// Evaluate an exit for a position this strategy owns. May update the
    /// position's running extrema.
    fn exit_check(
        &self,
        position: &mut Position,
        snapshot: &MarketSnapshot,
        holding_minutes: f64,
    ) -> ExitDecision;
}

/// Factory function type for building a router from config
pub type StrategyFactory = fn(&Config) -> Result<StrategyRouter, ConfigError>;

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert("grid_trading", grid_trading::create as StrategyFactory);
        map.insert("hybrid_grid", hybrid_grid::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Build the strategy stack named by `config.strategy_type`
pub fn create_router(config: &Config) -> Result<StrategyRouter, ConfigError> {
    let factory = {
        let registry = get_registry()
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match registry.get(config.strategy_type.as_str()) {
            Some(factory) => *factory,
            None => {
                let mut available: Vec<_> = registry.keys().copied().collect();
                available.sort_unstable();
                return Err(ConfigError::UnknownStrategy {
                    name: config.strategy_type.clone(),
                    available: available.join(", "),
                });
            }
        }
    };
    factory(config)
}

/// Registered strategy names
pub fn available_strategies() -> Vec<&'static str> {
    let mut names: Vec<_> = get_registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .keys()
        .copied()
        .collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lists_both_strategies() {
        assert_eq!(available_strategies(), vec!["grid_trading", "hybrid_grid"]);
    }

    #[test]
    fn test_unknown_strategy_fails_fast() {
        let config = Config {
            strategy_type: "martingale".to_string(),
            ..Config::default()
        };
        let err = create_router(&config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStrategy { .. }));
        assert!(err.to_string().contains("grid_trading, hybrid_grid"));
    }

    #[test]
    fn test_router_kinds() {
        let grid = create_router(&Config::default()).unwrap();
        assert_eq!(grid.name(), "grid_trading");
        assert!(!grid.has_breakout());

        let hybrid = create_router(&Config::preset("hybrid-grid").unwrap()).unwrap();
        assert_eq!(hybrid.name(), "hybrid_grid");
        assert!(hybrid.has_breakout());
    }
}
