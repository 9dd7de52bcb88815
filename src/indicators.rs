//! Technical indicators
//!
//! Series functions return one `Option<f64>` per input bar, `None` until the
//! window is full. Moving averages, RSI, Bollinger Bands and MACD are driven by
//! the `ta` crate; ATR, DMI and ADX use Wilder's smoothing implemented here.
//!
//! The `latest_*` helpers implement the neutral-default contract used by the
//! market snapshot: insufficient history never errors, it yields the
//! documented default instead.

use statrs::statistics::Statistics;
use ta::indicators::{
    BollingerBands as TaBB, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::Next;

/// RSI reading used when there is not enough history
pub const RSI_NEUTRAL: f64 = 50.0;

/// Upper, middle and lower band series
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Feed `values` through a `ta` indicator, masking the warmup bars
fn run_windowed<I>(indicator: Option<I>, values: &[f64], warmup: usize) -> Vec<Option<f64>>
where
    I: Next<f64, Output = f64>,
{
    let Some(mut indicator) = indicator else {
        return vec![None; values.len()];
    };
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let out = indicator.next(value);
            (i + 1 >= warmup).then_some(out)
        })
        .collect()
}

/// Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    run_windowed(SimpleMovingAverage::new(period).ok(), values, period)
}

/// Exponential Moving Average (seeded with the first value)
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    run_windowed(ExponentialMovingAverage::new(period).ok(), values, period)
}

/// Relative Strength Index
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }
    run_windowed(RelativeStrengthIndex::new(period).ok(), values, period + 1)
}

/// Bollinger Bands
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    let n = values.len();
    if n == 0 || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let Ok(mut indicator) = TaBB::new(period, num_std) else {
        return (vec![None; n], vec![None; n], vec![None; n]);
    };

    let mut upper = Vec::with_capacity(n);
    let mut middle = Vec::with_capacity(n);
    let mut lower = Vec::with_capacity(n);

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        let ready = i + 1 >= period;
        upper.push(ready.then_some(bb.upper));
        middle.push(ready.then_some(bb.average));
        lower.push(ready.then_some(bb.lower));
    }

    (upper, middle, lower)
}

/// Band width as a percentage of the middle band
pub fn bb_width_pct(upper: f64, middle: f64, lower: f64) -> Option<f64> {
    (middle > 0.0).then(|| (upper - lower) / middle * 100.0)
}

/// MACD line, signal line and histogram
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> BandOutput {
    let n = values.len();
    if n == 0 {
        return (vec![], vec![], vec![]);
    }

    let Ok(mut indicator) = MovingAverageConvergenceDivergence::new(fast, slow, signal) else {
        return (vec![None; n], vec![None; n], vec![None; n]);
    };

    let mut line = Vec::with_capacity(n);
    let mut signal_line = Vec::with_capacity(n);
    let mut histogram = Vec::with_capacity(n);

    for (i, &value) in values.iter().enumerate() {
        let out = indicator.next(value);
        let ready = i + 1 >= slow;
        line.push(ready.then_some(out.macd));
        signal_line.push(ready.then_some(out.signal));
        histogram.push(ready.then_some(out.histogram));
    }

    (line, signal_line, histogram)
}

/// True Range. The first bar has no previous close and uses high - low.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                return hl;
            }
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Wilder's smoothing: first value is the plain average, then
/// `(prev * (period - 1) + current) / period`
fn wilders_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let p = period as f64;
    let mut result = Vec::with_capacity(values.len());
    let mut smoothed: Option<f64> = None;

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
            continue;
        }
        let next = match smoothed {
            None => values[..period].iter().sum::<f64>() / p,
            Some(prev) => (prev * (p - 1.0) + values[i]) / p,
        };
        smoothed = Some(next);
        result.push(smoothed);
    }

    result
}

/// Average True Range with Wilder's smoothing
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 || high.len() != low.len() || high.len() != close.len() {
        return vec![];
    }
    wilders_smooth(&true_range(high, low, close), period)
}

/// Directional Movement Index, returns (+DI, -DI)
pub fn dmi(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    if high.is_empty() || period == 0 {
        return (vec![], vec![]);
    }

    let mut plus_dm = vec![0.0; high.len()];
    let mut minus_dm = vec![0.0; high.len()];

    for i in 1..high.len() {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let smoothed_plus = wilders_smooth(&plus_dm, period);
    let smoothed_minus = wilders_smooth(&minus_dm, period);
    let atr_values = atr(high, low, close, period);

    (0..high.len())
        .map(|i| match (smoothed_plus[i], smoothed_minus[i], atr_values[i]) {
            (Some(pdm), Some(mdm), Some(range)) if range > 0.0 => {
                (Some(pdm / range * 100.0), Some(mdm / range * 100.0))
            }
            _ => (None, None),
        })
        .unzip()
}

/// Average Directional Index. Needs `2 * period - 1` bars; bars with no
/// directional information (flat prices) contribute a DX of zero.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    if high.is_empty() || period == 0 {
        return vec![];
    }

    let (plus_di, minus_di) = dmi(high, low, close, period);
    let di_start = period - 1;
    if high.len() <= di_start {
        return vec![None; high.len()];
    }

    let dx: Vec<f64> = (di_start..high.len())
        .map(|i| match (plus_di[i], minus_di[i]) {
            (Some(p), Some(m)) if p + m > 0.0 => (p - m).abs() / (p + m) * 100.0,
            _ => 0.0,
        })
        .collect();

    let mut result = vec![None; di_start];
    result.extend(wilders_smooth(&dx, period));
    result
}

/// Rolling sample standard deviation
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period < 2 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            (i + 1 >= period).then(|| values[i + 1 - period..=i].iter().std_dev())
        })
        .collect()
}

/// Percentage change of the EMA over the last `lookback` bars
pub fn ema_slope(values: &[f64], period: usize, lookback: usize) -> Option<f64> {
    if lookback == 0 || values.len() <= lookback {
        return None;
    }
    let series = ema(values, period);
    let current = latest(&series)?;
    let previous = series[series.len() - 1 - lookback]?;
    (previous != 0.0).then(|| (current - previous) / previous * 100.0)
}

/// Average EMA slope across `periods`; `None` unless every period has a reading
pub fn average_ema_slope(values: &[f64], periods: &[usize], lookback: usize) -> Option<f64> {
    if periods.is_empty() {
        return None;
    }
    let slopes = periods
        .iter()
        .map(|&p| ema_slope(values, p, lookback))
        .collect::<Option<Vec<f64>>>()?;
    Some(slopes.iter().sum::<f64>() / slopes.len() as f64)
}

/// Mean of the last `count` defined readings of a series
pub fn trailing_mean(series: &[Option<f64>], count: usize) -> Option<f64> {
    let window: Vec<f64> = series.iter().rev().take(count).flatten().copied().collect();
    (!window.is_empty()).then(|| window.iter().sum::<f64>() / window.len() as f64)
}

/// Mean of the last `count` readings, `None` unless all of them are defined
pub fn full_window_mean(series: &[Option<f64>], count: usize) -> Option<f64> {
    if count == 0 || series.len() < count {
        return None;
    }
    let window = series[series.len() - count..]
        .iter()
        .copied()
        .collect::<Option<Vec<f64>>>()?;
    Some(window.iter().sum::<f64>() / count as f64)
}

/// Most recent reading of a series
pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Latest RSI, neutral when history is short
pub fn latest_rsi(values: &[f64], period: usize) -> f64 {
    latest(&rsi(values, period)).unwrap_or(RSI_NEUTRAL)
}

/// Latest SMA, falling back to the last price
pub fn latest_sma(values: &[f64], period: usize) -> f64 {
    latest(&sma(values, period))
        .or_else(|| values.last().copied())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(result[4].unwrap(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ema_tracks_constant_series() {
        let values = vec![10.0; 30];
        let result = ema(&values, 10);
        assert_eq!(result[8], None);
        assert_relative_eq!(result[29].unwrap(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rsi_bounds_and_default() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let value = latest_rsi(&rising, 14);
        assert!(value > 70.0 && value <= 100.0);

        assert_eq!(latest_rsi(&[100.0, 101.0], 14), RSI_NEUTRAL);
    }

    #[test]
    fn test_latest_sma_falls_back_to_price() {
        assert_eq!(latest_sma(&[5.0, 6.0], 25), 6.0);
        assert_eq!(latest_sma(&[], 25), 0.0);
    }

    #[test]
    fn test_atr_wilder() {
        let high = vec![11.0, 12.0, 13.0, 14.0];
        let low = vec![9.0, 10.0, 11.0, 12.0];
        let close = vec![10.0, 11.0, 12.0, 13.0];
        let result = atr(&high, &low, &close, 2);
        // TR = [2, 2, 2, 2]
        assert_eq!(result[0], None);
        assert_relative_eq!(result[1].unwrap(), 2.0, epsilon = 1e-9);
        assert_relative_eq!(result[3].unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adx_flat_series_is_zero() {
        let flat = vec![100.0; 60];
        let result = adx(&flat, &flat, &flat, 14);
        assert_eq!(result.len(), 60);
        assert_eq!(result[25], None);
        assert_relative_eq!(result[27].unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(latest(&result).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let close: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let high: Vec<f64> = close.iter().map(|c| c * 1.002).collect();
        let low: Vec<f64> = close.iter().map(|c| c * 0.998).collect();
        let value = latest(&adx(&high, &low, &close, 14)).unwrap();
        assert!(value > 50.0, "adx {value}");
    }

    #[test]
    fn test_bollinger_degenerate_on_flat_input() {
        let (upper, middle, lower) = bollinger_bands(&[50.0; 25], 20, 2.0);
        let (u, m, l) = (upper[24].unwrap(), middle[24].unwrap(), lower[24].unwrap());
        assert_relative_eq!(u, l, epsilon = 1e-9);
        assert_relative_eq!(bb_width_pct(u, m, l).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rolling_std_is_sample() {
        let result = rolling_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8);
        // sample variance of the classic example is 32/7
        assert_relative_eq!(result[7].unwrap(), (32.0f64 / 7.0).sqrt(), epsilon = 1e-9);
        assert_eq!(result[6], None);
    }

    #[test]
    fn test_ema_slope_sign() {
        let rising: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let falling: Vec<f64> = rising.iter().rev().copied().collect();
        assert!(ema_slope(&rising, 20, 5).unwrap() > 0.0);
        assert!(ema_slope(&falling, 20, 5).unwrap() < 0.0);
        assert!(average_ema_slope(&rising, &[20, 50], 5).unwrap() > 0.0);
        assert_eq!(ema_slope(&rising[..3], 20, 5), None);
    }

    #[test]
    fn test_trailing_mean_skips_missing() {
        let series = vec![None, Some(1.0), Some(2.0), Some(3.0)];
        assert_relative_eq!(trailing_mean(&series, 2).unwrap(), 2.5, epsilon = 1e-9);
        assert_relative_eq!(trailing_mean(&series, 10).unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(trailing_mean(&[None, None], 3), None);
    }

    #[test]
    fn test_full_window_mean_requires_complete_window() {
        let series = vec![None, Some(1.0), Some(3.0)];
        assert_relative_eq!(full_window_mean(&series, 2).unwrap(), 2.0, epsilon = 1e-9);
        assert_eq!(full_window_mean(&series, 3), None);
        assert_eq!(full_window_mean(&series, 4), None);
    }
}
