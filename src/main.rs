//! Hybrid grid trader - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Replay stored candles through the strategy
//! - live: Run live trading (paper or real)
//! - download: Download historical candles from Upbit

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "hybrid-grid-trader")]
#[command(about = "Adaptive grid + breakout trading with backtesting and live trading", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file (takes precedence over --preset)
        #[arg(short, long)]
        config: Option<String>,

        /// Named preset: default, grid-trading, hybrid-grid
        #[arg(short, long, default_value = "default")]
        preset: String,

        /// Markets to test (comma-separated). E.g., "KRW-BTC,KRW-ETH"
        #[arg(short, long)]
        market: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Parameter override, repeatable. E.g., --set grid.grid_spacing=0.5
        #[arg(long = "set", value_name = "SECTION.KEY=VALUE")]
        overrides: Vec<String>,

        /// Download missing data from the exchange before running
        #[arg(long)]
        fetch: bool,

        /// Skip writing JSON/Markdown/CSV reports
        #[arg(long)]
        no_report: bool,
    },

    /// Run live trading
    Live {
        /// Path to configuration file (takes precedence over --preset)
        #[arg(short, long)]
        config: Option<String>,

        /// Named preset: default, grid-trading, hybrid-grid
        #[arg(short, long, default_value = "default")]
        preset: String,

        /// Market to trade
        #[arg(short, long)]
        market: Option<String>,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Acknowledge that --live submits real orders
        #[arg(long)]
        confirm: bool,

        /// Seconds between ticks (defaults to trading.check_interval_secs)
        #[arg(long)]
        interval: Option<u64>,

        /// JSON file holding access_key and secret_key
        #[arg(long)]
        keys: Option<String>,

        /// Parameter override, repeatable
        #[arg(long = "set", value_name = "SECTION.KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// Download historical data from Upbit
    Download {
        /// Markets to download (comma-separated). E.g., "KRW-BTC,KRW-ETH"
        #[arg(short, long, default_value = "KRW-BTC")]
        markets: String,

        /// Number of days of history to fetch
        #[arg(short, long, default_value = "7")]
        days: u32,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        output: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // Same format without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Live { .. } => "live",
        Commands::Download { .. } => "download",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            preset,
            market,
            capital,
            overrides,
            fetch,
            no_report,
        } => commands::backtest::run(commands::backtest::BacktestArgs {
            config,
            preset,
            market,
            capital,
            overrides,
            fetch,
            no_report,
        }),

        Commands::Live {
            config,
            preset,
            market,
            paper,
            live,
            confirm,
            interval,
            keys,
            overrides,
        } => commands::live::run(commands::live::LiveArgs {
            config,
            preset,
            market,
            paper,
            live,
            confirm,
            interval,
            keys,
            overrides,
        }),

        Commands::Download {
            markets,
            days,
            output,
        } => commands::download::run(markets, days, output),
    }
}
