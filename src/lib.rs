//! Hybrid Grid Trader
//!
//! An adaptive grid + breakout trading engine for spot crypto markets.
//! A market mode classifier routes each tick either to the grid manager
//! (range-bound markets) or to the breakout sub-strategy (trending markets);
//! the same tick loop drives historical backtests and live trading.

pub mod backtest;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod ledger;
pub mod live;
pub mod report;
pub mod results;
pub mod snapshot;
pub mod strategies;
pub mod time_filter;
pub mod types;

pub use config::Config;
pub use types::*;
