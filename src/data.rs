//! Data loading and management
//!
//! OHLCV CSV files, candle normalization, multi-timeframe market history and
//! paginated history download from a [`MarketDataSource`].

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::exchange::MarketDataSource;
use crate::types::Candle;

/// Page size accepted by the candle endpoint
pub const CANDLES_PER_REQUEST: usize = 200;

/// Candle granularity used by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M5, Timeframe::M15, Timeframe::H1];

    pub fn minutes(self) -> i64 {
        match self {
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::H1 => 60,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5m" | "5" => Ok(Timeframe::M5),
            "15m" | "15" => Ok(Timeframe::M15),
            "1h" | "60" | "60m" => Ok(Timeframe::H1),
            _ => Err(format!("Unknown timeframe: {}. Use 5m, 15m or 1h", s)),
        }
    }
}

/// Sort by timestamp and drop duplicate timestamps, keeping the last one seen
pub fn normalize_candles(candles: Vec<Candle>) -> Vec<Candle> {
    let mut by_time: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
    for candle in candles {
        by_time.insert(candle.datetime, candle);
    }
    by_time.into_values().collect()
}

/// Candles for one market: the primary 5-minute series plus optional
/// 15-minute and 1-hour confirmation series
#[derive(Debug, Clone, Default)]
pub struct MarketHistory {
    pub primary: Vec<Candle>,
    pub confirm_15m: Vec<Candle>,
    pub confirm_1h: Vec<Candle>,
}

impl MarketHistory {
    pub fn new(primary: Vec<Candle>) -> Self {
        Self {
            primary: normalize_candles(primary),
            ..Default::default()
        }
    }

    pub fn with_confirmation(mut self, confirm_15m: Vec<Candle>, confirm_1h: Vec<Candle>) -> Self {
        self.confirm_15m = normalize_candles(confirm_15m);
        self.confirm_1h = normalize_candles(confirm_1h);
        self
    }

    pub fn len(&self) -> usize {
        self.primary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Everything known at primary bar `index`, trimmed to the last
    /// `max_lookback` bars. Confirmation series are cut at the same timestamp.
    pub fn window(&self, index: usize, max_lookback: usize) -> HistoryWindow<'_> {
        let end = (index + 1).min(self.primary.len());
        let start = end.saturating_sub(max_lookback.max(1));
        let primary = &self.primary[start..end];
        let Some(now) = primary.last().map(|c| c.datetime) else {
            return HistoryWindow::default();
        };
        HistoryWindow {
            primary,
            confirm_15m: up_to(&self.confirm_15m, now, max_lookback),
            confirm_1h: up_to(&self.confirm_1h, now, max_lookback),
        }
    }
}

fn up_to(candles: &[Candle], now: DateTime<Utc>, max_lookback: usize) -> &[Candle] {
    let end = candles.partition_point(|c| c.datetime <= now);
    &candles[end.saturating_sub(max_lookback.max(1))..end]
}

/// Borrowed view of the history available at one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryWindow<'a> {
    pub primary: &'a [Candle],
    pub confirm_15m: &'a [Candle],
    pub confirm_1h: &'a [Candle],
}

impl<'a> HistoryWindow<'a> {
    pub fn primary_only(primary: &'a [Candle]) -> Self {
        Self {
            primary,
            ..Default::default()
        }
    }

    pub fn last(&self) -> Option<&'a Candle> {
        self.primary.last()
    }
}

/// Load OHLCV data from a CSV file (`datetime,open,high,low,close,volume`)
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)?;

        let mut fields = [0.0f64; 5];
        for (offset, (slot, name)) in fields
            .iter_mut()
            .zip(["open", "high", "low", "close", "volume"])
            .enumerate()
        {
            *slot = record
                .get(offset + 1)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 1))?;
        }
        let [open, high, low, close, volume] = fields;

        match Candle::new(datetime, open, high, low, close, volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid candle at row {} in {:?}: {}",
                    row_idx + 2,
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid candles out of {} in {:?}",
            invalid_count,
            invalid_count + candles.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(normalize_candles(candles))
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
                .map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("Failed to parse datetime: {}", raw))
}

/// Write candles as CSV
pub fn save_csv(path: impl AsRef<Path>, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;
    for c in candles {
        writer.write_record(&[
            c.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            c.open.to_string(),
            c.high.to_string(),
            c.low.to_string(),
            c.close.to_string(),
            c.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// `{data_dir}/{market}_{timeframe}.csv`
pub fn data_path(data_dir: impl AsRef<Path>, market: &str, timeframe: Timeframe) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", market, timeframe))
}

/// Load the primary series and whatever confirmation series exist on disk
pub fn load_market_history(data_dir: impl AsRef<Path>, market: &str) -> Result<MarketHistory> {
    let data_dir = data_dir.as_ref();
    let primary = load_csv(data_path(data_dir, market, Timeframe::M5))
        .with_context(|| format!("No 5m data for {}", market))?;

    let load_optional = |tf: Timeframe| -> Result<Vec<Candle>> {
        let path = data_path(data_dir, market, tf);
        if path.exists() {
            load_csv(path)
        } else {
            debug!(market, timeframe = %tf, "Confirmation series not found, skipping");
            Ok(Vec::new())
        }
    };
    let confirm_15m = load_optional(Timeframe::M15)?;
    let confirm_1h = load_optional(Timeframe::H1)?;

    info!(
        market,
        bars_5m = primary.len(),
        bars_15m = confirm_15m.len(),
        bars_1h = confirm_1h.len(),
        "Loaded market history"
    );
    Ok(MarketHistory::new(primary).with_confirmation(confirm_15m, confirm_1h))
}

/// Page backward through the candle endpoint until `days` of history are
/// covered or the source runs dry
pub fn fetch_history<S: MarketDataSource + ?Sized>(
    source: &S,
    market: &str,
    timeframe: Timeframe,
    days: u32,
    request_delay: std::time::Duration,
) -> Result<Vec<Candle>> {
    let needed = (i64::from(days) * 24 * 60 / timeframe.minutes()).max(1) as usize;
    let cutoff = Utc::now() - Duration::days(i64::from(days));
    let mut collected: Vec<Candle> = Vec::with_capacity(needed);
    let mut before: Option<DateTime<Utc>> = None;

    while collected.len() < needed {
        let count = CANDLES_PER_REQUEST.min(needed - collected.len());
        let page = source
            .get_candles(market, timeframe, count, before)
            .with_context(|| format!("Failed to fetch {} {} candles", market, timeframe))?;
        let Some(oldest) = page.iter().map(|c| c.datetime).min() else {
            break;
        };
        debug!(market, timeframe = %timeframe, fetched = page.len(), "Fetched candle page");
        collected.extend(page);
        if oldest <= cutoff || before == Some(oldest) {
            break;
        }
        before = Some(oldest);
        std::thread::sleep(request_delay);
    }

    let candles: Vec<Candle> = normalize_candles(collected)
        .into_iter()
        .filter(|c| c.datetime >= cutoff)
        .collect();
    info!(market, timeframe = %timeframe, candles = candles.len(), "History download complete");
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(minute: i64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new_unchecked(
            start + Duration::minutes(minute),
            close,
            close,
            close,
            close,
            1.0,
        )
    }

    #[test]
    fn test_normalize_last_seen_wins() {
        let candles = vec![candle(10, 3.0), candle(0, 1.0), candle(10, 4.0), candle(5, 2.0)];
        let normalized = normalize_candles(candles);
        let closes: Vec<f64> = normalized.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 4.0]);
    }

    #[test]
    fn test_window_has_no_look_ahead() {
        let primary: Vec<Candle> = (0..10).map(|i| candle(i * 5, 100.0 + i as f64)).collect();
        let confirm: Vec<Candle> = (0..4).map(|i| candle(i * 15, 200.0)).collect();
        let history = MarketHistory::new(primary).with_confirmation(confirm, vec![]);

        let window = history.window(3, 300);
        assert_eq!(window.primary.len(), 4);
        assert_eq!(window.last().unwrap().close, 103.0);
        // bar 3 is at minute 15: confirmation candles at 0 and 15 are known
        assert_eq!(window.confirm_15m.len(), 2);
        assert!(window.confirm_1h.is_empty());

        let trimmed = history.window(9, 5);
        assert_eq!(trimmed.primary.len(), 5);
        assert_eq!(trimmed.primary[0].close, 105.0);
    }

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::M5);
        assert_eq!("1H".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert!("4h".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::M15.minutes(), 15);
    }

    #[test]
    fn test_csv_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("hgt-data-{}", std::process::id()));
        let path = data_path(&dir, "KRW-TEST", Timeframe::M5);
        let candles: Vec<Candle> = (0..3).map(|i| candle(i * 5, 10.0 + i as f64)).collect();
        save_csv(&path, &candles).unwrap();

        let history = load_market_history(&dir, "KRW-TEST").unwrap();
        assert_eq!(history.primary, candles);
        assert!(history.confirm_15m.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
