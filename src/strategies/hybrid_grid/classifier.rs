//! Market Mode Classifier
//!
//! ADX measures trend strength, the averaged EMA slope its direction and
//! steepness. Both must agree before the market counts as trending.

use super::config::TrendFilterConfig;
use crate::indicators;
use crate::snapshot::MarketSnapshot;
use crate::types::{Candle, MarketMode};

#[derive(Debug, Clone)]
pub struct MarketModeClassifier {
    config: TrendFilterConfig,
    required_history: usize,
}

impl MarketModeClassifier {
    /// `volatility_window` is the breakout std period; its rolling mean
    /// needs two full windows of closes.
    pub fn new(config: TrendFilterConfig, volatility_window: usize) -> Self {
        let required_history = config.required_history().max(volatility_window * 2);
        Self {
            config,
            required_history,
        }
    }

    pub fn config(&self) -> &TrendFilterConfig {
        &self.config
    }

    /// Bars needed before anything other than RANGE is reported
    pub fn required_history(&self) -> usize {
        self.required_history
    }

    /// Classify from readings already computed by the indicator adapter
    pub fn classify_snapshot(&self, snapshot: &MarketSnapshot) -> MarketMode {
        if snapshot.history_len < self.required_history {
            return MarketMode::Range;
        }
        decide(&self.config, snapshot.adx, snapshot.ema_slope)
    }

    /// Classify straight from a candle series
    pub fn classify(&self, candles: &[Candle]) -> MarketMode {
        if candles.len() < self.required_history {
            return MarketMode::Range;
        }
        classify(candles, &self.config)
    }
}

/// Stateless classification of `candles` with the given thresholds
pub fn classify(candles: &[Candle], config: &TrendFilterConfig) -> MarketMode {
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let adx = indicators::latest(&indicators::adx(&high, &low, &close, config.adx_period));
    let slope = indicators::average_ema_slope(&close, &config.ema_periods, config.slope_lookback);
    decide(config, adx, slope)
}

fn decide(config: &TrendFilterConfig, adx: Option<f64>, slope: Option<f64>) -> MarketMode {
    let Some(adx) = adx else {
        return MarketMode::Range;
    };
    let steep = slope.is_some_and(|s| s.abs() > config.ema_slope_threshold);
    if adx > config.adx_trend_threshold && steep {
        MarketMode::Trend
    } else if adx < config.adx_range_threshold {
        MarketMode::Range
    } else {
        MarketMode::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn flat(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Candle::new_unchecked(start + Duration::minutes(5 * i as i64), 100.0, 100.0, 100.0, 100.0, 1.0)
            })
            .collect()
    }

    fn ramp(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut price = 100.0;
        (0..n)
            .map(|i| {
                let open = price;
                price *= 1.005;
                Candle::new_unchecked(start + Duration::minutes(5 * i as i64), open, price, open, price, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_decision_table() {
        let cfg = TrendFilterConfig::default();
        assert_eq!(decide(&cfg, Some(30.0), Some(0.8)), MarketMode::Trend);
        assert_eq!(decide(&cfg, Some(30.0), Some(-0.8)), MarketMode::Trend);
        assert_eq!(decide(&cfg, Some(30.0), Some(0.1)), MarketMode::Neutral);
        assert_eq!(decide(&cfg, Some(30.0), None), MarketMode::Neutral);
        assert_eq!(decide(&cfg, Some(15.0), Some(0.8)), MarketMode::Range);
        assert_eq!(decide(&cfg, Some(22.0), Some(0.8)), MarketMode::Neutral);
        assert_eq!(decide(&cfg, None, Some(0.8)), MarketMode::Range);
    }

    #[test]
    fn test_required_history_covers_volatility_window() {
        let classifier = MarketModeClassifier::new(TrendFilterConfig::default(), 50);
        assert_eq!(classifier.required_history(), 100);
        let classifier = MarketModeClassifier::new(TrendFilterConfig::default(), 10);
        assert_eq!(classifier.required_history(), 55);
    }

    #[test]
    fn test_short_history_is_range() {
        let classifier = MarketModeClassifier::new(TrendFilterConfig::default(), 10);
        assert_eq!(classifier.classify(&ramp(40)), MarketMode::Range);

        let mut snapshot = MarketSnapshot::new(100.0, Utc::now());
        snapshot.adx = Some(40.0);
        snapshot.ema_slope = Some(2.0);
        snapshot.history_len = 54;
        assert_eq!(classifier.classify_snapshot(&snapshot), MarketMode::Range);
        snapshot.history_len = 55;
        assert_eq!(classifier.classify_snapshot(&snapshot), MarketMode::Trend);
    }

    #[test]
    fn test_flat_series_is_range() {
        assert_eq!(classify(&flat(200), &TrendFilterConfig::default()), MarketMode::Range);
    }

    #[test]
    fn test_steady_rise_is_trend() {
        assert_eq!(classify(&ramp(120), &TrendFilterConfig::default()), MarketMode::Trend);
    }
}
