//! Integration tests for the hybrid grid trader
//!
//! These tests drive the engine end to end: candles in, trades and results out.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};

use hybrid_grid_trader::backtest::Backtester;
use hybrid_grid_trader::data::{HistoryWindow, MarketHistory};
use hybrid_grid_trader::engine::{MarketQuote, SimulatedFills, TradingEngine, PERIOD_END};
use hybrid_grid_trader::snapshot::MarketSnapshot;
use hybrid_grid_trader::strategies::breakout::{BreakoutConfig, BreakoutStrategy};
use hybrid_grid_trader::strategies::ExitDecision;
use hybrid_grid_trader::{
    Candle, Config, Direction, ExitKind, IndicatorSnapshot, MarketMode, Position, SubStrategy,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle::new_unchecked(
        start_time() + Duration::minutes(5 * i as i64),
        open,
        high,
        low,
        close,
        1_000.0,
    )
}

/// Zero-volatility series: every bar at `price`
fn generate_flat_candles(count: usize, price: f64) -> Vec<Candle> {
    (0..count).map(|i| bar(i, price, price, price, price)).collect()
}

/// `flat` bars at `base`, then `ramp` bars compounding `step_pct` per bar.
/// Each ramp bar opens at the previous close and closes at its high.
fn generate_ramp_candles(flat: usize, ramp: usize, base: f64, step_pct: f64) -> Vec<Candle> {
    let mut candles = generate_flat_candles(flat, base);
    let mut close = base;
    for i in flat..flat + ramp {
        let open = close;
        close = open * (1.0 + step_pct / 100.0);
        candles.push(bar(i, open, close, open, close));
    }
    candles
}

/// Oscillating series around `base` with some intrabar range
fn generate_wave_candles(count: usize, base: f64, amplitude_pct: f64) -> Vec<Candle> {
    let mut prev = base;
    (0..count)
        .map(|i| {
            let close = base * (1.0 + amplitude_pct / 100.0 * (i as f64 / 12.0).sin());
            let high = prev.max(close) * 1.001;
            let low = prev.min(close) * 0.999;
            let candle = bar(i, prev, high, low, close);
            prev = close;
            candle
        })
        .collect()
}

fn assert_trade_timing(trades: &[hybrid_grid_trader::Trade]) {
    for t in trades {
        assert!(t.entry_time < t.exit_time, "trade {} exits at entry", t.id);
        let elapsed = (t.exit_time - t.entry_time).num_seconds() as f64 / 60.0;
        assert_relative_eq!(t.holding_minutes, elapsed);
    }
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_flat_market_initializes_grid_once() {
    let config = Config::preset("hybrid-grid").unwrap();
    let history = MarketHistory::new(generate_flat_candles(200, 100.0));

    let run = Backtester::new(config).run("KRW-BTC", &history).unwrap();
    let results = &run.results;

    assert_eq!(results.grid_initializations, 1);
    assert_eq!(results.mode_counts.trend, 0);
    assert_eq!(results.mode_counts.total(), 200 - 29);

    // Entries come only from the grid at the level the price sits on
    assert_eq!(results.total_trades, 3);
    let middle = run.engine.router().grid().state().unwrap().middle_index();
    for t in &results.trades {
        assert_eq!(t.sub_strategy, SubStrategy::Grid);
        assert_eq!(t.entry_grid_level, Some(middle));
        assert_eq!(t.exit_reason, PERIOD_END);
    }
    assert_trade_timing(&results.trades);
}

#[test]
fn test_trending_market_fires_breakout_long() {
    let config = Config::preset("hybrid-grid").unwrap();
    let history = MarketHistory::new(generate_ramp_candles(100, 60, 100.0, 0.5));

    let run = Backtester::new(config).run("KRW-BTC", &history).unwrap();
    let results = &run.results;

    assert!(results.mode_counts.trend > 0, "modes: {:?}", results.mode_counts);
    let breakout_longs: Vec<_> = results
        .trades
        .iter()
        .filter(|t| t.sub_strategy == SubStrategy::Breakout && t.direction == Direction::Long)
        .collect();
    assert!(!breakout_longs.is_empty());
    for t in &breakout_longs {
        assert_eq!(t.entry_snapshot.market_mode, MarketMode::Trend);
        assert!(t.entry_reason.contains("breakout"));
    }
    assert_trade_timing(&results.trades);
}

#[test]
fn test_long_trailing_stop_scenario() {
    let strategy = BreakoutStrategy::new(BreakoutConfig::default(), 0.5);
    let entry = start_time();
    let mut position = Position {
        id: 1,
        sub_strategy: SubStrategy::Breakout,
        direction: Direction::Long,
        entry_price: 100.0,
        entry_time: entry,
        quantity: 1.0,
        gross_amount: 100.0,
        amount: 100.0,
        entry_fee: 0.0,
        target_profit: None,
        entry_grid_level: None,
        peak_price: 100.0,
        trough_price: 100.0,
        entry_reason: String::new(),
        entry_snapshot: IndicatorSnapshot::default(),
    };
    let tick = |price: f64| {
        let mut snapshot = MarketSnapshot::new(price, entry);
        snapshot.atr = Some(2.0);
        snapshot
    };

    assert_eq!(strategy.evaluate_exit(&mut position, &tick(110.0)), ExitDecision::Hold);
    assert_eq!(strategy.evaluate_exit(&mut position, &tick(108.0)), ExitDecision::Hold);
    assert_eq!(strategy.evaluate_exit(&mut position, &tick(107.5)), ExitDecision::Hold);
    let exit = strategy.evaluate_exit(&mut position, &tick(107.0));
    assert!(matches!(exit, ExitDecision::Close { kind: ExitKind::TakeProfit, .. }));
    assert_relative_eq!(position.peak_price, 110.0);
}

#[test]
fn test_portfolio_stop_fires_before_single_stops() {
    let mut config = Config::default();
    config.grid.total_stop_loss = -3.0;
    config.grid.single_position_stop_loss = -2.0;
    config.trading.max_positions = 2;
    let mut engine = TradingEngine::new(&config, "KRW-BTC", 1_000_000.0).unwrap();
    let fills = SimulatedFills::new(config.exchange.fee_rate);

    let mut candles = generate_flat_candles(32, 100.0);
    for end in 29..32 {
        let window = HistoryWindow::primary_only(&candles[..=end]);
        engine.process_tick(&window, candles[end].datetime, MarketQuote::default(), &fills, true);
    }
    assert_eq!(engine.ledger().open_count(), 2);

    // Each position down 1.6%, together 3.2%
    candles.push(bar(32, 98.4, 98.4, 98.4, 98.4));
    let outcome = engine.process_tick(
        &HistoryWindow::primary_only(&candles),
        candles[32].datetime,
        MarketQuote::default(),
        &fills,
        true,
    );

    assert_eq!(outcome.closed.len(), 2);
    for t in &outcome.closed {
        assert!(t.exit_reason.starts_with("portfolio stop"), "{}", t.exit_reason);
        assert_eq!(t.exit_kind, ExitKind::StopLoss);
        assert!(t.profit_rate > config.grid.single_position_stop_loss);
    }
    assert_eq!(engine.ledger().open_count(), 0);
    assert_eq!(outcome.opened, None);
}

#[test]
fn test_period_end_closes_remaining_positions() {
    let config = Config::default();
    let history = MarketHistory::new(generate_flat_candles(60, 100.0));
    let run = Backtester::new(config).run("KRW-ETH", &history).unwrap();

    let forced: Vec<_> = run
        .results
        .trades
        .iter()
        .filter(|t| t.exit_reason == PERIOD_END)
        .collect();
    assert_eq!(forced.len(), 3);
    assert!(forced.iter().all(|t| t.exit_kind == ExitKind::Forced));
    assert_eq!(run.results.open_positions, 0);
    assert_eq!(run.engine.ledger().open_count(), 0);

    // Both fee legs are paid on every round trip at an unchanged price
    assert!(run.results.final_capital < run.results.initial_capital);
    assert_relative_eq!(run.results.final_capital, run.engine.ledger().capital());
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_open_positions_never_exceed_cap() {
    for preset in ["default", "hybrid-grid"] {
        let mut config = Config::preset(preset).unwrap();
        config.grid.grid_spacing = 0.5;
        let mut engine = TradingEngine::new(&config, "KRW-BTC", 1_000_000.0).unwrap();
        let fills = SimulatedFills::new(config.exchange.fee_rate);
        let candles = generate_wave_candles(400, 100.0, 3.0);
        let history = MarketHistory::new(candles);

        for index in 29..history.len() {
            let window = history.window(index, config.indicators.max_lookback);
            let now = history.primary[index].datetime;
            engine.process_tick(&window, now, MarketQuote::default(), &fills, index + 1 < history.len());
            assert!(engine.ledger().open_count() <= config.trading.max_positions);
        }
        assert_trade_timing(engine.ledger().trades());
    }
}

#[test]
fn test_wave_backtest_results_are_consistent() {
    let mut config = Config::preset("hybrid-grid").unwrap();
    config.grid.grid_spacing = 0.5;
    let history = MarketHistory::new(generate_wave_candles(600, 100.0, 3.0));
    let run = Backtester::new(config).run("KRW-BTC", &history).unwrap();
    let r = &run.results;

    assert_eq!(r.total_trades, r.trades.len());
    assert_eq!(r.winning_trades + r.losing_trades, r.total_trades);
    assert_eq!(r.open_positions, 0);
    assert!(r.max_drawdown <= 0.0);
    let summed: f64 = r.trades.iter().map(|t| t.profit).sum();
    assert_relative_eq!(r.total_profit, summed, epsilon = 1e-6);
    // Every open is paired with a close in the event stream
    assert_eq!(run.engine.ledger().events().len(), 2 * r.total_trades);
    let daily_trades: usize = r.daily_stats.iter().map(|d| d.trades).sum();
    assert_eq!(daily_trades, r.total_trades);
    assert_trade_timing(&r.trades);
}

#[test]
fn test_independent_markets_do_not_share_state() {
    let config = Config::preset("hybrid-grid").unwrap();
    let markets = vec![
        ("KRW-BTC".to_string(), MarketHistory::new(generate_flat_candles(120, 100.0))),
        ("KRW-ETH".to_string(), MarketHistory::new(generate_ramp_candles(100, 60, 50.0, 0.5))),
    ];
    let runs = Backtester::new(config.clone()).run_many(&markets);

    for (market, run) in runs {
        let run = run.unwrap();
        let single = Backtester::new(config.clone())
            .run(&market, &markets.iter().find(|(m, _)| *m == market).unwrap().1)
            .unwrap();
        assert_eq!(run.results.total_trades, single.results.total_trades);
        assert_eq!(run.results.mode_counts, single.results.mode_counts);
        assert_relative_eq!(run.results.final_capital, single.results.final_capital);
    }
}
