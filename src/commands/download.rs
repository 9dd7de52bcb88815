//! Download command implementation

use anyhow::Result;
use hybrid_grid_trader::data::{self, Timeframe};
use hybrid_grid_trader::exchange::UpbitClient;
use hybrid_grid_trader::Config;
use std::time::Duration;
use tracing::{info, warn};

use super::split_list;

pub fn run(markets: String, days: u32, output: String) -> Result<()> {
    let markets = split_list(&markets);
    if markets.is_empty() {
        anyhow::bail!("No markets given");
    }

    let config = Config::default();
    let client = UpbitClient::public(&config.exchange)?;
    let delay = Duration::from_millis(config.exchange.request_delay_ms);

    info!("Downloading {} days for {} market(s) into {}", days, markets.len(), output);
    for market in &markets {
        for tf in Timeframe::ALL {
            let candles = data::fetch_history(&client, market, tf, days, delay)?;
            if candles.is_empty() {
                warn!("No {} candles returned for {}", tf, market);
                continue;
            }
            let path = data::data_path(&output, market, tf);
            data::save_csv(&path, &candles)?;
            info!("Saved {} candles to {}", candles.len(), path.display());
        }
    }

    info!("Download completed");
    Ok(())
}
