//! Report writers
//!
//! Each run is saved three ways next to each other:
//! `{dir}/{coin}/{YYYY}/{MM}/{DD}/{market}_{mode}_{session}.{json,md,csv}`.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::live::market_currencies;
use crate::results::RunResults;
use crate::types::Trade;
use crate::Config;

/// Files written for one run
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
    pub csv: PathBuf,
}

/// Directory and file stem for a run's reports
pub fn report_stem(dir: impl AsRef<Path>, results: &RunResults) -> PathBuf {
    let (_, coin) = market_currencies(&results.market);
    let date = results.generated_at;
    dir.as_ref()
        .join(coin)
        .join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
        .join(date.format("%d").to_string())
        .join(format!("{}_{}_{}", results.market, results.mode, results.session_id))
}

/// Write JSON, Markdown and CSV reports. Runs without trades write nothing.
pub fn save_results(
    results: &RunResults,
    config: &Config,
    dir: impl AsRef<Path>,
) -> Result<Option<ReportPaths>> {
    if !results.has_trades() {
        warn!(market = %results.market, "No trades, skipping reports");
        return Ok(None);
    }

    let stem = report_stem(dir, results);
    if let Some(parent) = stem.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let paths = ReportPaths {
        json: stem.with_extension("json"),
        markdown: stem.with_extension("md"),
        csv: stem.with_extension("csv"),
    };

    fs::write(&paths.json, serde_json::to_string_pretty(results)?)
        .with_context(|| format!("Failed to write {}", paths.json.display()))?;
    fs::write(&paths.markdown, render_markdown(results, config)?)
        .with_context(|| format!("Failed to write {}", paths.markdown.display()))?;
    write_trades_csv(&paths.csv, &results.trades)?;

    info!(
        json = %paths.json.display(),
        markdown = %paths.markdown.display(),
        csv = %paths.csv.display(),
        "Reports saved"
    );
    Ok(Some(paths))
}

#[derive(Debug, Serialize)]
struct TradeRow<'a> {
    id: u64,
    market: &'a str,
    sub_strategy: String,
    direction: String,
    entry_time: String,
    exit_time: String,
    entry_price: f64,
    exit_price: f64,
    quantity: f64,
    amount: f64,
    net_amount: f64,
    profit: f64,
    profit_rate: f64,
    holding_minutes: f64,
    exit_kind: String,
    exit_reason: &'a str,
    entry_reason: &'a str,
    entry_grid_level: Option<usize>,
    entry_rsi_5m: f64,
    exit_rsi_5m: f64,
    entry_rsi_15m: Option<f64>,
    exit_rsi_15m: Option<f64>,
    entry_adx: Option<f64>,
    entry_ema_slope: Option<f64>,
    entry_market_mode: String,
}

impl<'a> From<&'a Trade> for TradeRow<'a> {
    fn from(t: &'a Trade) -> Self {
        Self {
            id: t.id,
            market: &t.market,
            sub_strategy: t.sub_strategy.to_string(),
            direction: t.direction.to_string(),
            entry_time: t.entry_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            exit_time: t.exit_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry_price: t.entry_price,
            exit_price: t.exit_price,
            quantity: t.quantity,
            amount: t.amount,
            net_amount: t.net_amount,
            profit: t.profit,
            profit_rate: t.profit_rate,
            holding_minutes: t.holding_minutes,
            exit_kind: t.exit_kind.to_string(),
            exit_reason: &t.exit_reason,
            entry_reason: &t.entry_reason,
            entry_grid_level: t.entry_grid_level,
            entry_rsi_5m: t.entry_snapshot.rsi_5m,
            exit_rsi_5m: t.exit_snapshot.rsi_5m,
            entry_rsi_15m: t.entry_snapshot.rsi_15m,
            exit_rsi_15m: t.exit_snapshot.rsi_15m,
            entry_adx: t.entry_snapshot.adx,
            entry_ema_slope: t.entry_snapshot.ema_slope,
            entry_market_mode: t.entry_snapshot.market_mode.to_string(),
        }
    }
}

fn write_trades_csv(path: &Path, trades: &[Trade]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for trade in trades {
        writer.serialize(TradeRow::from(trade))?;
    }
    writer.flush()?;
    Ok(())
}

fn opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.*}", precision, v))
}

/// Human-readable summary with a per-trade indicator breakdown
pub fn render_markdown(results: &RunResults, config: &Config) -> Result<String> {
    let mut md = String::new();
    let r = results;

    writeln!(md, "# {} {} results", r.market, r.mode)?;
    writeln!(md)?;
    writeln!(md, "**Strategy**: {}", r.strategy)?;
    writeln!(md, "**Session**: `{}`", r.session_id)?;
    writeln!(md, "**Generated**: {}", r.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(md)?;

    writeln!(md, "## Profit")?;
    writeln!(md)?;
    writeln!(md, "| Item | Value |")?;
    writeln!(md, "|------|------|")?;
    writeln!(md, "| Initial capital | {:.0} |", r.initial_capital)?;
    writeln!(md, "| Final capital | {:.0} |", r.final_capital)?;
    writeln!(md, "| Net change | {:.0} |", r.final_capital - r.initial_capital)?;
    writeln!(md, "| Return on capital | **{:+.2}%** |", r.total_profit_rate)?;
    writeln!(md, "| Average trade return | {:+.2}% |", r.avg_profit_rate)?;
    writeln!(md)?;

    writeln!(md, "## Trades")?;
    writeln!(md)?;
    writeln!(md, "| Item | Value |")?;
    writeln!(md, "|------|------|")?;
    writeln!(md, "| Total | {} |", r.total_trades)?;
    writeln!(md, "| Wins | {} |", r.winning_trades)?;
    writeln!(md, "| Losses | {} |", r.losing_trades)?;
    writeln!(md, "| Win rate | **{:.1}%** |", r.win_rate)?;
    writeln!(md, "| Average win | {:+.2}% |", r.avg_win)?;
    writeln!(md, "| Average loss | {:+.2}% |", r.avg_loss)?;
    writeln!(md, "| Average holding | {:.1} min |", r.avg_holding_minutes)?;
    writeln!(md, "| Trades per day | {:.1} |", r.avg_trades_per_day)?;
    writeln!(md, "| Profitable days | {}/{} |", r.profitable_days, r.total_days)?;
    writeln!(md)?;

    writeln!(md, "## Risk")?;
    writeln!(md)?;
    writeln!(md, "| Item | Value |")?;
    writeln!(md, "|------|------|")?;
    writeln!(md, "| Max drawdown | {:.2}% |", r.max_drawdown)?;
    writeln!(md, "| Sharpe ratio | {:.2} |", r.sharpe_ratio)?;
    writeln!(md)?;

    writeln!(md, "## Market modes")?;
    writeln!(md)?;
    writeln!(md, "| Mode | Ticks |")?;
    writeln!(md, "|------|------|")?;
    writeln!(md, "| RANGE | {} |", r.mode_counts.range)?;
    writeln!(md, "| TREND | {} |", r.mode_counts.trend)?;
    writeln!(md, "| NEUTRAL | {} |", r.mode_counts.neutral)?;
    writeln!(md, "| Grid initializations | {} |", r.grid_initializations)?;
    writeln!(md)?;

    writeln!(md, "## Trade log")?;
    writeln!(md)?;
    writeln!(md, "| Exit time | Type | Entry | Exit | Return | Held | Reason |")?;
    writeln!(md, "|------|------|------|------|------|------|------|")?;
    for t in &r.trades {
        writeln!(
            md,
            "| {} | {} {} | {:.0} | {:.0} | {:+.2}% | {:.1} min | {} |",
            t.exit_time.format("%m-%d %H:%M"),
            t.sub_strategy,
            t.direction,
            t.entry_price,
            t.exit_price,
            t.profit_rate,
            t.holding_minutes,
            t.exit_reason
        )?;
    }
    writeln!(md)?;

    writeln!(md, "## Trade details")?;
    writeln!(md)?;
    for (i, t) in r.trades.iter().enumerate() {
        let (entry, exit) = (&t.entry_snapshot, &t.exit_snapshot);
        writeln!(md, "### Trade #{} ({})", i + 1, if t.profit_rate > 0.0 { "win" } else { "loss" })?;
        writeln!(md)?;
        writeln!(md, "| Item | Entry | Exit |")?;
        writeln!(md, "|------|------|------|")?;
        writeln!(
            md,
            "| Time | {} | {} |",
            t.entry_time.format("%Y-%m-%d %H:%M:%S"),
            t.exit_time.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(md, "| Price | {:.0} | {:.0} |", t.entry_price, t.exit_price)?;
        writeln!(md, "| Reason | {} | {} |", t.entry_reason, t.exit_reason)?;
        writeln!(md, "| Mode | {} | {} |", entry.market_mode, exit.market_mode)?;
        writeln!(md, "| RSI 5m | {:.1} | {:.1} |", entry.rsi_5m, exit.rsi_5m)?;
        writeln!(md, "| RSI 15m | {} | {} |", opt(entry.rsi_15m, 1), opt(exit.rsi_15m, 1))?;
        writeln!(md, "| RSI 1h | {} | {} |", opt(entry.rsi_1h, 1), opt(exit.rsi_1h, 1))?;
        writeln!(md, "| SMA 7 | {:.0} | {:.0} |", entry.sma_7, exit.sma_7)?;
        writeln!(md, "| SMA 25 | {:.0} | {:.0} |", entry.sma_25, exit.sma_25)?;
        writeln!(md, "| ATR | {} | {} |", opt(entry.atr, 2), opt(exit.atr, 2))?;
        writeln!(md, "| ADX | {} | {} |", opt(entry.adx, 1), opt(exit.adx, 1))?;
        writeln!(md, "| EMA slope | {} | {} |", opt(entry.ema_slope, 3), opt(exit.ema_slope, 3))?;
        writeln!(md, "| Volume ratio | {} | {} |", opt(entry.volume_ratio, 2), opt(exit.volume_ratio, 2))?;
        if entry.bid_ask_ratio.is_some() || exit.bid_ask_ratio.is_some() {
            writeln!(
                md,
                "| Bid/ask ratio | {} | {} |",
                opt(entry.bid_ask_ratio, 2),
                opt(exit.bid_ask_ratio, 2)
            )?;
            writeln!(
                md,
                "| Bid imbalance | {} | {} |",
                opt(entry.bid_imbalance, 3),
                opt(exit.bid_imbalance, 3)
            )?;
        }
        writeln!(md)?;
    }

    writeln!(md, "## Configuration")?;
    writeln!(md)?;
    writeln!(md, "```json")?;
    writeln!(md, "{}", serde_json::to_string_pretty(config)?)?;
    writeln!(md, "```")?;
    Ok(md)
}
