//! Exchange access
//!
//! The engine only ever talks to the two traits defined here. The Upbit
//! client implements both; tests and paper trading substitute their own.

pub mod auth;
pub mod upbit;

pub use upbit::UpbitClient;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Timeframe;
use crate::error::ExchangeError;
use crate::types::{Candle, Side};

/// Supplies OHLCV candles and prices
pub trait MarketDataSource {
    /// Up to `count` candles ending before `before` (or now), oldest first.
    /// May return fewer, or none, when history is exhausted.
    fn get_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        count: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    fn current_price(&self, market: &str) -> Result<f64, ExchangeError>;

    /// Bid/ask volume ratio and imbalance from the order book, if supported
    fn order_book_pressure(&self, _market: &str) -> Result<Option<OrderBookPressure>, ExchangeError> {
        Ok(None)
    }
}

/// How much to trade in a market order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderSize {
    /// Quote-currency amount (market buys)
    Notional(f64),
    /// Base-currency quantity (market sells)
    Quantity(f64),
}

/// Exchange acknowledgement of a market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub order_id: String,
    pub average_price: Option<f64>,
    pub executed_quantity: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookPressure {
    /// Total bid size over total ask size
    pub bid_ask_ratio: f64,
    /// (bids - asks) / (bids + asks)
    pub imbalance: f64,
}

/// Submits real orders. Used only by the live position executor.
pub trait OrderGateway {
    fn submit_market_order(
        &self,
        side: Side,
        market: &str,
        size: OrderSize,
    ) -> Result<FillResult, ExchangeError>;

    /// Available balance of `currency`
    fn balance(&self, currency: &str) -> Result<f64, ExchangeError>;
}
