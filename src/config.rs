//! Configuration management
//!
//! JSON configuration files, named presets and flat `section.key=value`
//! overrides. Every section is optional in the file and falls back to its
//! defaults. API credentials come from the environment (or `.env`) so they
//! never need to live in a config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::strategies::breakout::BreakoutConfig;
use crate::strategies::grid_trading::GridTradingConfig;
use crate::strategies::hybrid_grid::TrendFilterConfig;
use crate::time_filter::TimeFilterConfig;

pub const PRESETS: &[&str] = &["default", "grid-trading", "hybrid-grid"];

const ACCESS_KEY_ENV: &str = "UPBIT_ACCESS_KEY";
const SECRET_KEY_ENV: &str = "UPBIT_SECRET_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registered strategy name: `grid_trading` or `hybrid_grid`
    pub strategy_type: String,
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub indicators: IndicatorConfig,
    pub grid: GridTradingConfig,
    pub trend_filter: TrendFilterConfig,
    pub breakout: BreakoutConfig,
    pub time_filter: TimeFilterConfig,
    pub backtest: BacktestConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            strategy_type: "grid_trading".to_string(),
            exchange: ExchangeConfig::default(),
            trading: TradingConfig::default(),
            indicators: IndicatorConfig::default(),
            grid: GridTradingConfig::default(),
            trend_filter: TrendFilterConfig::default(),
            breakout: BreakoutConfig::default(),
            time_filter: TimeFilterConfig::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.load_credentials_from_env();
        Ok(config)
    }

    /// Named parameter sets
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        match name {
            "default" => {}
            "grid-trading" => {
                config.grid.total_stop_loss = -3.0;
            }
            "hybrid-grid" => {
                config.strategy_type = "hybrid_grid".to_string();
                config.grid.total_stop_loss = -3.0;
                config.grid.profit_target.enabled = true;
            }
            other => {
                return Err(ConfigError::UnknownPreset {
                    name: other.to_string(),
                    available: PRESETS.join(", "),
                })
            }
        }
        config.load_credentials_from_env();
        Ok(config)
    }

    /// Pick up API keys from the environment if the file did not set them
    pub fn load_credentials_from_env(&mut self) {
        if let Ok(key) = std::env::var(ACCESS_KEY_ENV) {
            self.exchange.access_key = Some(key);
        }
        if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
            self.exchange.secret_key = Some(secret);
        }
    }

    /// Load `{ "access_key": ..., "secret_key": ... }` from a key file
    pub fn load_credentials_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        #[derive(Deserialize)]
        struct KeyFile {
            access_key: String,
            secret_key: String,
        }
        let contents =
            fs::read_to_string(path.as_ref()).context("Failed to read API key file")?;
        let keys: KeyFile =
            serde_json::from_str(&contents).context("Failed to parse API key file")?;
        self.exchange.access_key = Some(keys.access_key);
        self.exchange.secret_key = Some(keys.secret_key);
        Ok(())
    }

    /// Apply `section.key=value` overrides. Values are parsed as JSON scalars,
    /// falling back to a plain string.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<(), ConfigError> {
        if overrides.is_empty() {
            return Ok(());
        }

        let mut tree = serde_json::to_value(&*self)
            .map_err(|e| ConfigError::invalid("config", e.to_string()))?;

        for raw in overrides {
            let raw = raw.as_ref();
            let (path, value) = parse_override(raw)?;
            let mut node = &mut tree;
            let keys: Vec<&str> = path.split('.').collect();
            for (depth, key) in keys.iter().enumerate() {
                let object = node
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::MalformedOverride(raw.to_string()))?;
                if depth + 1 == keys.len() {
                    if !object.contains_key(*key) {
                        return Err(ConfigError::invalid(path, "unknown parameter"));
                    }
                    object.insert((*key).to_string(), value.clone());
                    break;
                }
                node = object
                    .get_mut(*key)
                    .ok_or_else(|| ConfigError::invalid(path, "unknown section"))?;
            }
        }

        let updated: Config = serde_json::from_value(tree)
            .map_err(|e| ConfigError::invalid("override", e.to_string()))?;
        let access_key = self.exchange.access_key.take();
        let secret_key = self.exchange.secret_key.take();
        *self = updated;
        self.exchange.access_key = self.exchange.access_key.take().or(access_key);
        self.exchange.secret_key = self.exchange.secret_key.take().or(secret_key);
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let grid = &self.grid;
        if grid.grid_levels == 0 || grid.grid_levels % 2 == 0 {
            return Err(ConfigError::invalid(
                "grid.grid_levels",
                format!("must be odd and positive, got {}", grid.grid_levels),
            ));
        }
        if grid.grid_spacing <= 0.0 {
            return Err(ConfigError::invalid("grid.grid_spacing", "must be positive"));
        }
        if (grid.grid_levels / 2) as f64 * grid.grid_spacing >= 100.0 {
            return Err(ConfigError::invalid(
                "grid.grid_spacing",
                "lowest grid level would be at or below zero",
            ));
        }
        if grid.grid_reset_hours.is_nan() || grid.grid_reset_hours < 0.0 {
            return Err(ConfigError::invalid(
                "grid.grid_reset_hours",
                "must be zero (disabled) or positive",
            ));
        }
        let target = &grid.profit_target;
        if !(target.min_profit_target_pct.is_finite()
            && target.max_profit_target_pct.is_finite()
            && target.min_profit_target_pct <= target.max_profit_target_pct)
        {
            return Err(ConfigError::invalid(
                "grid.profit_target.min_profit_target_pct",
                format!(
                    "must be finite and not exceed max_profit_target_pct ({} > {})",
                    target.min_profit_target_pct, target.max_profit_target_pct
                ),
            ));
        }
        if grid.bb_width_narrow_pct > grid.bb_width_wide_pct {
            return Err(ConfigError::invalid(
                "grid.bb_width_narrow_pct",
                "must not exceed bb_width_wide_pct",
            ));
        }
        if grid.total_stop_loss > 0.0 {
            return Err(ConfigError::invalid(
                "grid.total_stop_loss",
                "must be zero (disabled) or negative",
            ));
        }
        if self.trading.max_positions == 0 {
            return Err(ConfigError::invalid("trading.max_positions", "must be at least 1"));
        }
        if self.trading.initial_capital <= 0.0 {
            return Err(ConfigError::invalid("trading.initial_capital", "must be positive"));
        }
        if !(0.0..100.0).contains(&self.exchange.fee_rate) {
            return Err(ConfigError::invalid(
                "exchange.fee_rate",
                "must be a percentage in [0, 100)",
            ));
        }
        if self.trend_filter.ema_periods.is_empty() || self.trend_filter.ema_periods.contains(&0)
        {
            return Err(ConfigError::invalid(
                "trend_filter.ema_periods",
                "needs at least one positive period",
            ));
        }
        if self.trend_filter.adx_range_threshold > self.trend_filter.adx_trend_threshold {
            return Err(ConfigError::invalid(
                "trend_filter.adx_range_threshold",
                "must not exceed adx_trend_threshold",
            ));
        }
        if !(0.0..=1.0).contains(&self.breakout.position_fraction) {
            return Err(ConfigError::invalid("breakout.position_fraction", "must be in [0, 1]"));
        }
        if self.breakout.std_period < 2 {
            return Err(ConfigError::invalid("breakout.std_period", "must be at least 2"));
        }
        let periods = [
            ("indicators.rsi_period", self.indicators.rsi_period),
            ("indicators.bb_period", self.indicators.bb_period),
            ("indicators.atr_period", self.indicators.atr_period),
            ("indicators.atr_ma_period", self.indicators.atr_ma_period),
            ("indicators.volume_ma_period", self.indicators.volume_ma_period),
            ("trend_filter.adx_period", self.trend_filter.adx_period),
        ];
        for (field, period) in periods {
            if period == 0 {
                return Err(ConfigError::invalid(field, "period must be positive"));
            }
        }
        Ok(())
    }

    /// Credentials for the private API, required for real trading
    pub fn credentials(&self) -> Result<(String, String), ConfigError> {
        let access = self
            .exchange
            .access_key
            .clone()
            .ok_or(ConfigError::MissingCredential(ACCESS_KEY_ENV))?;
        let secret = self
            .exchange
            .secret_key
            .clone()
            .ok_or(ConfigError::MissingCredential(SECRET_KEY_ENV))?;
        Ok((access, secret))
    }
}

/// Split `section.key=value`, parsing the value as JSON where possible
pub fn parse_override(raw: &str) -> Result<(&str, serde_json::Value), ConfigError> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedOverride(raw.to_string()))?;
    let path = path.trim();
    let value = value.trim();
    if path.is_empty() || value.is_empty() {
        return Err(ConfigError::MalformedOverride(raw.to_string()));
    }
    let parsed = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((path, parsed))
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub base_url: String,
    /// Fee per fill in percent of notional (0.05 = 0.05%)
    pub fee_rate: f64,
    /// Pause between paginated history requests
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            access_key: None,
            secret_key: None,
            base_url: "https://api.upbit.com/v1".to_string(),
            fee_rate: 0.05,
            request_delay_ms: 110,
            timeout_secs: 10,
        }
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub market: String,
    pub initial_capital: f64,
    /// Total notional the strategy may deploy; defaults to `trade_amount_ratio` of capital
    pub trade_amount: Option<f64>,
    pub trade_amount_ratio: f64,
    pub max_positions: usize,
    pub cooldown_minutes: i64,
    pub max_trades_per_day: Option<u32>,
    /// Live loop sleep between ticks
    pub check_interval_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            market: "KRW-BTC".to_string(),
            initial_capital: 1_000_000.0,
            trade_amount: None,
            trade_amount_ratio: 0.8,
            max_positions: 3,
            cooldown_minutes: 0,
            max_trades_per_day: None,
            check_interval_secs: 60,
        }
    }
}

impl TradingConfig {
    pub fn resolved_trade_amount(&self, capital: f64) -> f64 {
        self.trade_amount
            .unwrap_or(capital * self.trade_amount_ratio)
    }
}

/// Indicator windows shared by every strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub sma_periods: [usize; 3],
    pub bb_period: usize,
    pub bb_std: f64,
    pub atr_period: usize,
    /// Number of ATR readings averaged into the ATR moving average
    pub atr_ma_period: usize,
    pub volume_ma_period: usize,
    /// Indicators are computed over at most this many trailing bars
    pub max_lookback: usize,
    /// Bars required before the first tick is evaluated
    pub min_history: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            rsi_period: 14,
            sma_periods: [7, 25, 99],
            bb_period: 20,
            bb_std: 2.0,
            atr_period: 14,
            atr_ma_period: 20,
            volume_ma_period: 20,
            max_lookback: 300,
            min_history: 30,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub data_dir: String,
    pub results_dir: String,
    pub days: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: "data".to_string(),
            results_dir: "backtest_reports".to_string(),
            days: 7,
        }
    }
}
