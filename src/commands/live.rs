//! Live trading command implementation
//!
//! The trading loop is synchronous and runs on a blocking worker; the async
//! runtime only listens for Ctrl+C and flips the stop flag, which the loop
//! checks between ticks.

use anyhow::{Context, Result};
use hybrid_grid_trader::engine::{FillModel, GatewayFills, SimulatedFills};
use hybrid_grid_trader::exchange::{MarketDataSource, UpbitClient};
use hybrid_grid_trader::live::{account_capital, LiveSession};
use hybrid_grid_trader::report;
use hybrid_grid_trader::results::RunResults;
use hybrid_grid_trader::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use super::load_config;

#[derive(Debug)]
pub struct LiveArgs {
    pub config: Option<String>,
    pub preset: String,
    pub market: Option<String>,
    pub paper: bool,
    pub live: bool,
    pub confirm: bool,
    pub interval: Option<u64>,
    pub keys: Option<String>,
    pub overrides: Vec<String>,
}

pub fn run(args: LiveArgs) -> Result<()> {
    if args.paper == args.live {
        anyhow::bail!("Must specify exactly one of --paper or --live");
    }
    if args.live && !args.confirm {
        anyhow::bail!("--live places real orders; pass --confirm to proceed");
    }

    let mut config = load_config(args.config.as_deref(), &args.preset, &args.overrides)?;
    if let Some(market) = &args.market {
        config.trading.market = market.clone();
    }
    if let Some(path) = &args.keys {
        config.load_credentials_from_file(path)?;
    }
    let interval = Duration::from_secs(args.interval.unwrap_or(config.trading.check_interval_secs));

    if args.live {
        // Fail before starting the runtime if keys are missing
        config.credentials().context("Live trading needs API credentials")?;
        warn!("⚠️  LIVE TRADING MODE - REAL MONEY AT RISK!");
        warn!("Press Ctrl+C within 5 seconds to abort...");
        std::thread::sleep(Duration::from_secs(5));
    }

    info!(
        "Starting {} trading on {} (interval: {}s)",
        if args.paper { "PAPER" } else { "LIVE" },
        config.trading.market,
        interval.as_secs()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let results = runtime.block_on(run_async(config.clone(), args.live, interval))?;

    print_summary(&results);
    report::save_results(&results, &config, &config.backtest.results_dir)?;
    Ok(())
}

async fn run_async(config: Config, real: bool, interval: Duration) -> Result<RunResults> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("🛑 Ctrl+C received - finishing current tick and shutting down");
                stop_flag.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                error!("Failed to listen for shutdown signal: {}", err);
            }
        }
    });

    // The blocking HTTP client must live and die off the async executor
    let worker = tokio::task::spawn_blocking(move || -> Result<RunResults> {
        let market = config.trading.market.clone();
        if real {
            let (access, secret) = config.credentials()?;
            let client = UpbitClient::authenticated(&config.exchange, &access, &secret)?;
            let (krw, capital) = account_capital(&client, &client, &market)?;
            let fills = GatewayFills::new(client.clone(), config.exchange.fee_rate);
            let mut session = LiveSession::new(&config, &market, capital, client, fills)?;
            session.cap_trade_amount(krw);
            Ok(drive(&mut session, &stop, interval))
        } else {
            let client = UpbitClient::public(&config.exchange)?;
            let fills = SimulatedFills::new(config.exchange.fee_rate);
            let capital = config.trading.initial_capital;
            let mut session = LiveSession::new(&config, &market, capital, client, fills)?;
            Ok(drive(&mut session, &stop, interval))
        }
    });

    worker.await.context("Trading worker panicked")?
}

fn drive<S: MarketDataSource, F: FillModel>(
    session: &mut LiveSession<S, F>,
    stop: &AtomicBool,
    interval: Duration,
) -> RunResults {
    info!("✅ Entering main trading loop (session {})", session.session_id());
    session.run(stop, interval);
    info!("Shutting down gracefully...");
    let results = session.stop();
    info!("✅ Shutdown complete");
    results
}

fn print_summary(r: &RunResults) {
    println!("\n{}", "=".repeat(60));
    println!("LIVE SESSION: {} ({})", r.market, r.session_id);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.0}", r.initial_capital);
    println!("Final Capital:      {:.0}", r.final_capital);
    println!("Total Return:       {:+.2}%", r.total_profit_rate);
    println!("Total Trades:       {}", r.total_trades);
    println!("Win Rate:           {:.2}%", r.win_rate);
    println!("Max Drawdown:       {:.2}%", r.max_drawdown);
    println!("Sharpe Ratio:       {:.2}", r.sharpe_ratio);
    println!("{}", "=".repeat(60));
}
