//! Subcommand implementations

pub mod backtest;
pub mod download;
pub mod live;

use anyhow::{Context, Result};
use hybrid_grid_trader::Config;
use tracing::info;

/// Config file if given, otherwise the named preset; then `--set` overrides
pub fn load_config(path: Option<&str>, preset: &str, overrides: &[String]) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path);
            config
        }
        None => {
            let config = Config::preset(preset)?;
            info!("Using preset: {}", preset);
            config
        }
    };
    for raw in overrides {
        info!("Override: {}", raw);
    }
    config.apply_overrides(overrides)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Split a comma-separated list, dropping blanks
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
