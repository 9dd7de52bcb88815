//! Run results
//!
//! Aggregate statistics over the closed trades of one engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::fmt;

use crate::engine::{ModeCounts, TradingEngine};
use crate::ledger::DailyStat;
use crate::types::Trade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Backtest,
    Live,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub mode: RunMode,
    pub market: String,
    pub strategy: String,
    pub session_id: String,
    pub generated_at: DateTime<Utc>,

    pub initial_capital: f64,
    pub final_capital: f64,
    /// Sum of realized trade profits
    pub total_profit: f64,
    /// Final capital against initial capital, percent
    pub total_profit_rate: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_profit_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Deepest fall of cumulative profit below its running peak, percent of
    /// initial capital (zero or negative)
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub avg_holding_minutes: f64,

    pub avg_trades_per_day: f64,
    pub profitable_days: usize,
    pub total_days: usize,

    pub grid_initializations: usize,
    pub mode_counts: ModeCounts,
    /// Positions still open when the results were taken
    pub open_positions: usize,

    pub trades: Vec<Trade>,
    pub daily_stats: Vec<DailyStat>,
}

impl RunResults {
    /// Results of `engine` so far. Open positions are marked at the last
    /// seen price.
    pub fn from_engine(engine: &TradingEngine, mode: RunMode, session_id: impl Into<String>) -> Self {
        let ledger = engine.ledger();
        let trades = ledger.trades().to_vec();
        let daily_stats = ledger.daily_stats();
        let initial_capital = ledger.initial_capital();

        let final_capital = match engine.last_snapshot() {
            Some(snapshot) => ledger.equity(snapshot.current_price),
            None => ledger.capital(),
        };
        let total_profit_rate = if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital * 100.0
        } else {
            0.0
        };

        let rates: Vec<f64> = trades.iter().map(|t| t.profit_rate).collect();
        let wins: Vec<f64> = rates.iter().copied().filter(|r| *r > 0.0).collect();
        let losses: Vec<f64> = rates.iter().copied().filter(|r| *r <= 0.0).collect();

        let total_days = daily_stats.len().max(1);
        let avg_trades_per_day = if daily_stats.is_empty() {
            0.0
        } else {
            daily_stats.iter().map(|d| d.trades as f64).mean()
        };

        Self {
            mode,
            market: engine.market().to_string(),
            strategy: engine.router().name().to_string(),
            session_id: session_id.into(),
            generated_at: Utc::now(),
            initial_capital,
            final_capital,
            total_profit: trades.iter().map(|t| t.profit).sum(),
            total_profit_rate,
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate: percentage(wins.len(), trades.len()),
            avg_profit_rate: mean_or_zero(&rates),
            avg_win: mean_or_zero(&wins),
            avg_loss: mean_or_zero(&losses),
            max_drawdown: max_drawdown(&trades, initial_capital),
            sharpe_ratio: sharpe_ratio(&rates),
            avg_holding_minutes: mean_or_zero(
                &trades.iter().map(|t| t.holding_minutes).collect::<Vec<_>>(),
            ),
            avg_trades_per_day,
            profitable_days: daily_stats.iter().filter(|d| d.total_profit > 0.0).count(),
            total_days,
            grid_initializations: engine.router().grid().initializations(),
            mode_counts: engine.mode_counts(),
            open_positions: ledger.open_count(),
            trades,
            daily_stats,
        }
    }

    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.mean()
    }
}

/// Minimum of cumulative profit minus its running maximum, as a percentage
/// of initial capital. The running maximum starts at the first cumulative
/// value, not at zero.
pub fn max_drawdown(trades: &[Trade], initial_capital: f64) -> f64 {
    if trades.is_empty() || initial_capital <= 0.0 {
        return 0.0;
    }
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst: f64 = 0.0;
    for trade in trades {
        cumulative += trade.profit;
        peak = peak.max(cumulative);
        worst = worst.min(cumulative - peak);
    }
    worst / initial_capital * 100.0
}

/// Mean trade profit rate over its sample standard deviation, zero when
/// undefined
pub fn sharpe_ratio(rates: &[f64]) -> f64 {
    if rates.len() < 2 {
        return 0.0;
    }
    let std = rates.std_dev();
    if std.is_finite() && std > 0.0 {
        rates.mean() / std
    } else {
        0.0
    }
}
