//! Market snapshot and the indicator adapter that produces it
//!
//! A [`MarketSnapshot`] is recomputed every tick from the history available
//! up to and including that tick. Every indicator field is either a plain
//! value with a documented neutral default or an `Option` where "not enough
//! history" is a meaningful state the strategies must handle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::IndicatorConfig;
use crate::data::HistoryWindow;
use crate::indicators::{self, RSI_NEUTRAL};
use crate::strategies::hybrid_grid::TrendFilterConfig;
use crate::types::{Candle, IndicatorSnapshot, MarketMode};

#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketSnapshot {
    pub current_price: f64,
    pub timestamp: DateTime<Utc>,
    pub latest_candle: Option<Candle>,
    /// Number of primary bars the readings were computed from
    pub history_len: usize,

    /// Default 50
    pub rsi_5m: f64,
    pub rsi_15m: Option<f64>,
    pub rsi_1h: Option<f64>,
    /// Default: current price
    pub sma_7: f64,
    pub sma_25: f64,
    pub sma_99: f64,

    pub atr: Option<f64>,
    /// Mean of the most recent ATR readings; equals `atr` while history is short
    pub atr_ma: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    /// Band width as a percentage of the middle band
    pub bb_width: Option<f64>,
    pub macd_histogram: Option<f64>,

    pub adx: Option<f64>,
    /// One entry per configured EMA period
    pub ema_slopes: Vec<Option<f64>>,
    /// Average of `ema_slopes`, set only when every period has a reading
    pub ema_slope: Option<f64>,
    pub close_std: Option<f64>,
    pub close_std_ma: Option<f64>,

    pub volume_ma: Option<f64>,
    pub volume_ratio: Option<f64>,
    /// Order book readings, live only
    pub bid_ask_ratio: Option<f64>,
    pub bid_imbalance: Option<f64>,

    pub active_positions: usize,
    /// Sum of unrealized profit rates (percent) across open positions
    pub total_profit_rate: f64,
}

impl MarketSnapshot {
    /// Snapshot with only a price; every indicator at its neutral default
    pub fn new(current_price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            current_price,
            timestamp,
            rsi_5m: RSI_NEUTRAL,
            sma_7: current_price,
            sma_25: current_price,
            sma_99: current_price,
            ..Default::default()
        }
    }

    /// ATR relative to its moving average, when both are usable
    pub fn atr_ratio(&self) -> Option<f64> {
        match (self.atr, self.atr_ma) {
            (Some(atr), Some(ma)) if ma > 0.0 => Some(atr / ma),
            _ => None,
        }
    }

    /// Fractional position of the price between the bands (0 = lower, 1 = upper).
    /// `None` when bands are missing or degenerate.
    pub fn bb_position(&self) -> Option<f64> {
        match (self.bb_upper, self.bb_lower) {
            (Some(upper), Some(lower)) if upper > lower => {
                Some((self.current_price - lower) / (upper - lower))
            }
            _ => None,
        }
    }

    /// Band width as a percentage of the current price
    pub fn bb_width_of_price(&self) -> Option<f64> {
        match (self.bb_upper, self.bb_lower) {
            (Some(upper), Some(lower)) if self.current_price > 0.0 => {
                Some((upper - lower) / self.current_price * 100.0)
            }
            _ => None,
        }
    }

    /// Reporting copy attached to positions and trades
    pub fn capture(&self, mode: MarketMode) -> IndicatorSnapshot {
        IndicatorSnapshot {
            price: self.current_price,
            rsi_5m: self.rsi_5m,
            rsi_15m: self.rsi_15m,
            rsi_1h: self.rsi_1h,
            sma_7: self.sma_7,
            sma_25: self.sma_25,
            sma_99: self.sma_99,
            volume_ratio: self.volume_ratio,
            bid_ask_ratio: self.bid_ask_ratio,
            bid_imbalance: self.bid_imbalance,
            atr: self.atr,
            bb_width: self.bb_width,
            adx: self.adx,
            ema_slope: self.ema_slope,
            market_mode: mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    len: usize,
    last_time: DateTime<Utc>,
    last_close: f64,
    last_volume: f64,
    len_15m: usize,
    len_1h: usize,
}

impl CacheKey {
    fn of(window: &HistoryWindow<'_>) -> Option<Self> {
        let last = window.primary.last()?;
        Some(Self {
            len: window.primary.len(),
            last_time: last.datetime,
            last_close: last.close,
            last_volume: last.volume,
            len_15m: window.confirm_15m.len(),
            len_1h: window.confirm_1h.len(),
        })
    }
}

/// Computes snapshots, memoizing the most recent one so repeated requests
/// within a tick (exit pass, entry pass, forced close) share one computation.
#[derive(Debug, Clone)]
pub struct IndicatorAdapter {
    indicators: IndicatorConfig,
    trend: TrendFilterConfig,
    std_period: usize,
    cache: Option<(CacheKey, MarketSnapshot)>,
}

impl IndicatorAdapter {
    pub fn new(indicators: IndicatorConfig, trend: TrendFilterConfig, std_period: usize) -> Self {
        Self {
            indicators,
            trend,
            std_period,
            cache: None,
        }
    }

    /// Snapshot for the last bar of `window`; `None` if the window is empty
    pub fn snapshot(&mut self, window: &HistoryWindow<'_>) -> Option<MarketSnapshot> {
        let key = CacheKey::of(window)?;
        if let Some((cached_key, snapshot)) = &self.cache {
            if *cached_key == key {
                return Some(snapshot.clone());
            }
        }
        let snapshot = self.compute(window)?;
        self.cache = Some((key, snapshot.clone()));
        Some(snapshot)
    }

    fn compute(&self, window: &HistoryWindow<'_>) -> Option<MarketSnapshot> {
        let candles = window.primary;
        let last = candles.last()?;
        let cfg = &self.indicators;

        let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volume: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let mut snapshot = MarketSnapshot::new(last.close, last.datetime);
        snapshot.latest_candle = Some(last.clone());
        snapshot.history_len = candles.len();

        snapshot.rsi_5m = indicators::latest_rsi(&close, cfg.rsi_period);
        snapshot.rsi_15m = confirm_rsi(window.confirm_15m, cfg.rsi_period);
        snapshot.rsi_1h = confirm_rsi(window.confirm_1h, cfg.rsi_period);
        let [short, mid, long] = cfg.sma_periods;
        snapshot.sma_7 = indicators::latest_sma(&close, short);
        snapshot.sma_25 = indicators::latest_sma(&close, mid);
        snapshot.sma_99 = indicators::latest_sma(&close, long);

        let atr_series = indicators::atr(&high, &low, &close, cfg.atr_period);
        snapshot.atr = indicators::latest(&atr_series);
        snapshot.atr_ma = indicators::trailing_mean(&atr_series, cfg.atr_ma_period);

        let (upper, middle, lower) = indicators::bollinger_bands(&close, cfg.bb_period, cfg.bb_std);
        snapshot.bb_upper = indicators::latest(&upper);
        snapshot.bb_middle = indicators::latest(&middle);
        snapshot.bb_lower = indicators::latest(&lower);
        if let (Some(u), Some(m), Some(l)) = (snapshot.bb_upper, snapshot.bb_middle, snapshot.bb_lower)
        {
            snapshot.bb_width = indicators::bb_width_pct(u, m, l);
        }
        let (_, _, histogram) = indicators::macd(&close, 12, 26, 9);
        snapshot.macd_histogram = indicators::latest(&histogram);

        snapshot.adx =
            indicators::latest(&indicators::adx(&high, &low, &close, self.trend.adx_period));
        snapshot.ema_slopes = self
            .trend
            .ema_periods
            .iter()
            .map(|&p| indicators::ema_slope(&close, p, self.trend.slope_lookback))
            .collect();
        let slopes: Option<Vec<f64>> = snapshot.ema_slopes.iter().copied().collect();
        snapshot.ema_slope = slopes
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().sum::<f64>() / s.len() as f64);

        let std_series = indicators::rolling_std(&close, self.std_period);
        snapshot.close_std = indicators::latest(&std_series);
        snapshot.close_std_ma = indicators::full_window_mean(&std_series, self.std_period);

        snapshot.volume_ma = indicators::latest(&indicators::sma(&volume, cfg.volume_ma_period));
        snapshot.volume_ratio = snapshot
            .volume_ma
            .filter(|ma| *ma > 0.0)
            .map(|ma| last.volume / ma);

        Some(snapshot)
    }
}

fn confirm_rsi(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    Some(indicators::latest_rsi(&close, period))
}
