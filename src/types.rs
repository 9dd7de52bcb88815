//! Core data types used across the trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (trusted sources, synthetic test data)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Position direction. Grid positions are always long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Which sub-strategy owns a position's exit logic. Set at entry, never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubStrategy {
    Grid,
    Breakout,
}

impl fmt::Display for SubStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubStrategy::Grid => write!(f, "grid"),
            SubStrategy::Breakout => write!(f, "breakout"),
        }
    }
}

/// Market regime label produced by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketMode {
    #[default]
    Range,
    Trend,
    Neutral,
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketMode::Range => write!(f, "RANGE"),
            MarketMode::Trend => write!(f, "TREND"),
            MarketMode::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// How a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    TakeProfit,
    StopLoss,
    /// End of data or explicit stop
    Forced,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::TakeProfit => write!(f, "take_profit"),
            ExitKind::StopLoss => write!(f, "stop_loss"),
            ExitKind::Forced => write!(f, "forced"),
        }
    }
}

/// Indicator values captured at entry or exit, kept for reporting only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub rsi_5m: f64,
    pub rsi_15m: Option<f64>,
    pub rsi_1h: Option<f64>,
    pub sma_7: f64,
    pub sma_25: f64,
    pub sma_99: f64,
    pub volume_ratio: Option<f64>,
    pub bid_ask_ratio: Option<f64>,
    pub bid_imbalance: Option<f64>,
    pub atr: Option<f64>,
    pub bb_width: Option<f64>,
    pub adx: Option<f64>,
    pub ema_slope: Option<f64>,
    pub market_mode: MarketMode,
}

/// An open trade owned by the position ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub sub_strategy: SubStrategy,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub quantity: f64,
    /// Pre-fee notional debited from capital
    pub gross_amount: f64,
    /// Notional after the entry fee; realized profit is measured against this
    pub amount: f64,
    pub entry_fee: f64,
    /// Take-profit override in percent, computed at entry
    pub target_profit: Option<f64>,
    pub entry_grid_level: Option<usize>,
    /// Running maximum since entry (long trailing stop)
    pub peak_price: f64,
    /// Running minimum since entry (short trailing stop)
    pub trough_price: f64,
    pub entry_reason: String,
    pub entry_snapshot: IndicatorSnapshot,
}

impl Position {
    /// Unrealized profit rate in percent at `price`, direction aware
    pub fn profit_rate(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        match self.direction {
            Direction::Long => (price - self.entry_price) / self.entry_price * 100.0,
            Direction::Short => (self.entry_price - price) / self.entry_price * 100.0,
        }
    }

    /// Position value at `price` before exit fees
    pub fn market_value(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Long => self.quantity * price,
            Direction::Short => self.amount + self.quantity * (self.entry_price - price),
        }
    }

    /// Fractional minutes held as of `now`
    pub fn holding_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.entry_time).num_seconds() as f64 / 60.0
    }
}

/// A closed round-trip. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub market: String,
    pub sub_strategy: SubStrategy,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub amount: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub net_amount: f64,
    pub profit: f64,
    pub profit_rate: f64,
    pub holding_minutes: f64,
    pub exit_kind: ExitKind,
    pub exit_reason: String,
    pub entry_reason: String,
    pub entry_grid_level: Option<usize>,
    pub entry_snapshot: IndicatorSnapshot,
    pub exit_snapshot: IndicatorSnapshot,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.profit > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn position(direction: Direction) -> Position {
        Position {
            id: 1,
            sub_strategy: SubStrategy::Breakout,
            direction,
            entry_price: 100.0,
            entry_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            quantity: 9.95,
            gross_amount: 1000.0,
            amount: 995.0,
            entry_fee: 5.0,
            target_profit: None,
            entry_grid_level: None,
            peak_price: 100.0,
            trough_price: 100.0,
            entry_reason: String::new(),
            entry_snapshot: IndicatorSnapshot::default(),
        }
    }

    #[test]
    fn test_candle_validation() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(Candle::new(ts, 100.0, 105.0, 95.0, 102.0, 10.0).is_ok());
        assert!(matches!(
            Candle::new(ts, 100.0, 95.0, 105.0, 100.0, 10.0),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
        assert!(matches!(
            Candle::new(ts, 0.0, 105.0, 95.0, 100.0, 10.0),
            Err(CandleValidationError::NonPositivePrice { .. })
        ));
        assert!(matches!(
            Candle::new(ts, 100.0, 105.0, 95.0, 100.0, -1.0),
            Err(CandleValidationError::NegativeVolume(_))
        ));
    }

    #[test]
    fn test_profit_rate_by_direction() {
        let long = position(Direction::Long);
        let short = position(Direction::Short);
        assert_relative_eq!(long.profit_rate(102.0), 2.0, epsilon = 1e-9);
        assert_relative_eq!(short.profit_rate(102.0), -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_short_market_value_gains_when_price_falls() {
        let short = position(Direction::Short);
        assert!(short.market_value(90.0) > short.amount);
        assert!(short.market_value(110.0) < short.amount);
    }
}
