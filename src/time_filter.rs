//! Trading-hours filter
//!
//! Hours and weekdays are evaluated in the exchange's local time, given as a
//! fixed UTC offset (Upbit runs on KST, UTC+9). Weekdays are numbered from
//! Monday = 0.

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Hour-of-day policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HourPolicy {
    /// Morning session plus the late-night overlap
    #[default]
    Optimal,
    /// Everything except known low-liquidity hours
    Safe,
    /// Only the busiest hours
    Peak,
    /// Explicit `allowed_hours`
    Custom,
}

const OPTIMAL_LATE_START: u32 = 23;
const OPTIMAL_LATE_END: u32 = 2;
const SAFE_EXCLUDED_HOURS: [u32; 8] = [3, 4, 5, 14, 15, 19, 20, 21];
const PEAK_HOURS: [u32; 6] = [0, 6, 7, 8, 9, 23];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeFilterConfig {
    pub enabled: bool,
    pub mode: HourPolicy,
    pub exclude_weekdays: Vec<u32>,
    pub preferred_weekdays: Option<Vec<u32>>,
    pub allowed_hours: Vec<u32>,
    pub utc_offset_hours: i32,
}

impl Default for TimeFilterConfig {
    fn default() -> Self {
        TimeFilterConfig {
            enabled: false,
            mode: HourPolicy::Optimal,
            exclude_weekdays: Vec::new(),
            preferred_weekdays: None,
            allowed_hours: Vec::new(),
            utc_offset_hours: 9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeFilter {
    config: TimeFilterConfig,
    offset: FixedOffset,
}

impl TimeFilter {
    pub fn new(config: TimeFilterConfig) -> Result<Self, ConfigError> {
        let offset = FixedOffset::east_opt(config.utc_offset_hours * 3600).ok_or_else(|| {
            ConfigError::invalid(
                "time_filter.utc_offset_hours",
                format!("{} is not a valid offset", config.utc_offset_hours),
            )
        })?;
        if config.mode == HourPolicy::Custom && config.allowed_hours.is_empty() && config.enabled {
            return Err(ConfigError::invalid(
                "time_filter.allowed_hours",
                "custom mode needs at least one allowed hour",
            ));
        }
        Ok(Self { config, offset })
    }

    /// A filter that allows every timestamp
    pub fn disabled() -> Self {
        Self {
            config: TimeFilterConfig::default(),
            offset: Utc.fix(),
        }
    }

    pub fn is_trading_time(&self, timestamp: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }

        let local = timestamp.with_timezone(&self.offset);
        let weekday = local.weekday().num_days_from_monday();

        if self.config.exclude_weekdays.contains(&weekday) {
            return false;
        }
        if let Some(preferred) = &self.config.preferred_weekdays {
            if !preferred.contains(&weekday) {
                return false;
            }
        }

        let hour = local.hour();
        match self.config.mode {
            HourPolicy::Optimal => {
                (6..=12).contains(&hour) || hour >= OPTIMAL_LATE_START || hour <= OPTIMAL_LATE_END
            }
            HourPolicy::Safe => !SAFE_EXCLUDED_HOURS.contains(&hour),
            HourPolicy::Peak => PEAK_HOURS.contains(&hour),
            HourPolicy::Custom => self.config.allowed_hours.contains(&hour),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn filter(mode: HourPolicy) -> TimeFilter {
        TimeFilter::new(TimeFilterConfig {
            enabled: true,
            mode,
            allowed_hours: vec![10, 11],
            ..Default::default()
        })
        .unwrap()
    }

    // 2024-01-01 is a Monday; 01:00 UTC is 10:00 KST
    fn utc(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_disabled_filter_allows_everything() {
        let f = TimeFilter::disabled();
        for hour in 0..24 {
            assert!(f.is_trading_time(utc(hour)));
        }
    }

    #[test]
    fn test_optimal_hours_in_local_time() {
        let f = filter(HourPolicy::Optimal);
        assert!(f.is_trading_time(utc(1))); // 10 KST
        assert!(!f.is_trading_time(utc(6))); // 15 KST
        assert!(f.is_trading_time(utc(15))); // 00 KST next day
    }

    #[test]
    fn test_safe_excludes_low_liquidity() {
        let f = filter(HourPolicy::Safe);
        assert!(!f.is_trading_time(utc(19))); // 04 KST
        assert!(f.is_trading_time(utc(0))); // 09 KST
    }

    #[test]
    fn test_peak_and_custom() {
        assert!(filter(HourPolicy::Peak).is_trading_time(utc(23))); // 08 KST
        assert!(!filter(HourPolicy::Peak).is_trading_time(utc(3))); // 12 KST
        assert!(filter(HourPolicy::Custom).is_trading_time(utc(2))); // 11 KST
        assert!(!filter(HourPolicy::Custom).is_trading_time(utc(4))); // 13 KST
    }

    #[test]
    fn test_weekday_rules() {
        let f = TimeFilter::new(TimeFilterConfig {
            enabled: true,
            mode: HourPolicy::Safe,
            exclude_weekdays: vec![0],
            ..Default::default()
        })
        .unwrap();
        assert!(!f.is_trading_time(utc(1))); // Monday
        assert!(f.is_trading_time(utc(1) + chrono::Duration::days(1)));

        let preferred = TimeFilter::new(TimeFilterConfig {
            enabled: true,
            mode: HourPolicy::Safe,
            preferred_weekdays: Some(vec![2]),
            ..Default::default()
        })
        .unwrap();
        assert!(!preferred.is_trading_time(utc(1)));
        assert!(preferred.is_trading_time(utc(1) + chrono::Duration::days(2)));
    }

    #[test]
    fn test_rejects_bad_offset() {
        let result = TimeFilter::new(TimeFilterConfig {
            utc_offset_hours: 30,
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
