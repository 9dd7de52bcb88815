//! Backtesting engine
//!
//! Replays stored candles through a [`TradingEngine`] with simulated fills.
//! Each bar is one tick; the final bar only evaluates exits, after which any
//! remaining positions are closed at the last price.

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::data::MarketHistory;
use crate::engine::{MarketQuote, SimulatedFills, TradingEngine, PERIOD_END};
use crate::error::ConfigError;
use crate::results::{RunMode, RunResults};
use crate::Config;

/// A finished backtest: the engine's final state and its aggregate results
#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub engine: TradingEngine,
    pub results: RunResults,
}

pub struct Backtester {
    config: Config,
    show_progress: bool,
}

impl Backtester {
    pub fn new(config: Config) -> Self {
        Backtester {
            config,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn progress_bar(&self, len: usize, market: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg} {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░ ");
        pb.set_style(style);
        pb.set_message(market.to_string());
        pb
    }

    /// Run one market through a fresh engine
    pub fn run(&self, market: &str, history: &MarketHistory) -> Result<BacktestRun, ConfigError> {
        let initial_capital = self.config.trading.initial_capital;
        let mut engine = TradingEngine::new(&self.config, market, initial_capital)?;
        let fills = SimulatedFills::new(self.config.exchange.fee_rate);
        let session_id = Utc::now().format("%Y%m%d_%H%M%S").to_string();

        let bars = history.len();
        let min_history = self.config.indicators.min_history.max(1);
        let max_lookback = self.config.indicators.max_lookback;

        if bars < min_history {
            warn!(market, bars, min_history, "Not enough history to backtest");
            let results = RunResults::from_engine(&engine, RunMode::Backtest, session_id);
            return Ok(BacktestRun { engine, results });
        }

        info!(
            market,
            bars,
            strategy = engine.router().name(),
            capital = initial_capital,
            "Starting backtest"
        );

        let first = min_history - 1;
        let pb = self.progress_bar(bars - first, market);
        for index in first..bars {
            let window = history.window(index, max_lookback);
            let allow_entry = index + 1 < bars;
            let now = history.primary[index].datetime;
            engine.process_tick(&window, now, MarketQuote::default(), &fills, allow_entry);
            pb.inc(1);
        }
        pb.finish_and_clear();

        let last_index = bars - 1;
        let window = history.window(last_index, max_lookback);
        if let Some(last) = window.last() {
            let open = engine.ledger().open_count();
            if open > 0 {
                info!(market, open, "Closing remaining positions at period end");
            }
            engine.force_close_all(&window, MarketQuote::default(), last.datetime, PERIOD_END, &fills);
        }

        for (reason, count) in engine.top_rejections(5) {
            info!(market, reason = %reason, count, "Entry rejection");
        }

        let results = RunResults::from_engine(&engine, RunMode::Backtest, session_id);
        info!(
            market,
            trades = results.total_trades,
            win_rate = format!("{:.1}%", results.win_rate).as_str(),
            profit_rate = format!("{:+.2}%", results.total_profit_rate).as_str(),
            "Backtest finished"
        );
        Ok(BacktestRun { engine, results })
    }

    /// Run several markets in parallel; each gets its own engine
    pub fn run_many(
        &self,
        markets: &[(String, MarketHistory)],
    ) -> Vec<(String, Result<BacktestRun, ConfigError>)> {
        markets
            .par_iter()
            .map(|(market, history)| (market.clone(), self.run(market, history)))
            .collect()
    }
}
