//! Backtest command implementation

use anyhow::{Context, Result};
use hybrid_grid_trader::backtest::{BacktestRun, Backtester};
use hybrid_grid_trader::data::{self, MarketHistory, Timeframe};
use hybrid_grid_trader::exchange::UpbitClient;
use hybrid_grid_trader::report;
use hybrid_grid_trader::results::RunResults;
use hybrid_grid_trader::Config;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{load_config, split_list};

#[derive(Debug)]
pub struct BacktestArgs {
    pub config: Option<String>,
    pub preset: String,
    pub market: Option<String>,
    pub capital: Option<f64>,
    pub overrides: Vec<String>,
    pub fetch: bool,
    pub no_report: bool,
}

pub fn run(args: BacktestArgs) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(args.config.as_deref(), &args.preset, &args.overrides)?;
    if let Some(capital) = args.capital {
        info!("Overriding initial capital to: {:.0}", capital);
        config.trading.initial_capital = capital;
        config.validate()?;
    }

    let markets = match &args.market {
        Some(list) => split_list(list),
        None => vec![config.trading.market.clone()],
    };
    if markets.is_empty() {
        anyhow::bail!("No markets given");
    }

    if args.fetch {
        download_missing(&config, &markets)?;
    }

    info!("Loading data from: {}", config.backtest.data_dir);
    let mut histories: Vec<(String, MarketHistory)> = Vec::with_capacity(markets.len());
    for market in &markets {
        let history = data::load_market_history(&config.backtest.data_dir, market)
            .with_context(|| format!("Run `download --markets {}` first, or pass --fetch", market))?;
        histories.push((market.clone(), history));
    }

    let backtester = Backtester::new(config.clone()).with_progress(histories.len() == 1);
    info!(
        "Running {} backtest on {} market(s)",
        config.strategy_type,
        histories.len()
    );
    let runs = backtester.run_many(&histories);

    let mut failures = 0;
    for (market, run) in runs {
        match run {
            Ok(BacktestRun { results, .. }) => {
                print_results(&results);
                if !args.no_report {
                    report::save_results(&results, &config, &config.backtest.results_dir)?;
                }
            }
            Err(e) => {
                error!("Backtest failed for {}: {}", market, e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} market(s) failed", failures);
    }

    info!("Backtest completed successfully");
    Ok(())
}

fn download_missing(config: &Config, markets: &[String]) -> Result<()> {
    let client = UpbitClient::public(&config.exchange)?;
    let delay = Duration::from_millis(config.exchange.request_delay_ms);
    for market in markets {
        for tf in Timeframe::ALL {
            let path = data::data_path(&config.backtest.data_dir, market, tf);
            if path.exists() {
                continue;
            }
            warn!("{} missing, downloading {} days", path.display(), config.backtest.days);
            let candles = data::fetch_history(&client, market, tf, config.backtest.days, delay)?;
            data::save_csv(&path, &candles)?;
        }
    }
    Ok(())
}

fn print_results(r: &RunResults) {
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {} ({})", r.market, r.strategy);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.0}", r.initial_capital);
    println!("Final Capital:      {:.0}", r.final_capital);
    println!("Total Return:       {:+.2}%", r.total_profit_rate);
    println!("Total Trades:       {}", r.total_trades);
    println!("Winning Trades:     {}", r.winning_trades);
    println!("Losing Trades:      {}", r.losing_trades);
    println!("Win Rate:           {:.2}%", r.win_rate);
    println!("Average Trade:      {:+.2}%", r.avg_profit_rate);
    println!("Average Win:        {:+.2}%", r.avg_win);
    println!("Average Loss:       {:+.2}%", r.avg_loss);
    println!("Max Drawdown:       {:.2}%", r.max_drawdown);
    println!("Sharpe Ratio:       {:.2}", r.sharpe_ratio);
    println!("Avg Holding:        {:.1} min", r.avg_holding_minutes);
    println!("Trades per Day:     {:.1}", r.avg_trades_per_day);
    println!("Profitable Days:    {}/{}", r.profitable_days, r.total_days);
    println!(
        "Market Modes:       range {} / trend {} / neutral {}",
        r.mode_counts.range, r.mode_counts.trend, r.mode_counts.neutral
    );
    println!("Grid Resets:        {}", r.grid_initializations);
    println!("{}", "=".repeat(60));
}
