//! Live trading session
//!
//! Fetches fresh candles every tick and feeds them through the same
//! [`TradingEngine`] the backtest uses. Fills come from either the synthetic
//! model (paper trading) or the exchange gateway (real trading).

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::{MarketHistory, Timeframe, CANDLES_PER_REQUEST};
use crate::engine::{FillModel, MarketQuote, TickOutcome, TradingEngine, MANUAL_STOP};
use crate::error::{ConfigError, ExchangeError};
use crate::exchange::{MarketDataSource, OrderGateway};
use crate::results::{RunMode, RunResults};
use crate::types::Trade;
use crate::Config;

/// Quote and base currency of a `KRW-BTC` style market
pub fn market_currencies(market: &str) -> (&str, &str) {
    market.split_once('-').unwrap_or(("KRW", market))
}

/// Starting capital for real trading: quote balance plus the value of any
/// base currency already held. Returns `(quote_balance, total)`.
pub fn account_capital<G, S>(gateway: &G, source: &S, market: &str) -> Result<(f64, f64), ExchangeError>
where
    G: OrderGateway + ?Sized,
    S: MarketDataSource + ?Sized,
{
    let (quote, base) = market_currencies(market);
    let quote_balance = gateway.balance(quote)?;
    let base_balance = gateway.balance(base)?;
    let base_value = if base_balance > 0.0 {
        base_balance * source.current_price(market)?
    } else {
        0.0
    };
    info!(
        market,
        quote_balance,
        base_balance,
        base_value,
        "Account balance"
    );
    Ok((quote_balance, quote_balance + base_value))
}

/// Source of tick timestamps
pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

pub struct LiveSession<S, F> {
    engine: TradingEngine,
    clock: Clock,
    source: S,
    fills: F,
    max_lookback: usize,
    min_history: usize,
    session_id: String,
    history: Option<MarketHistory>,
    ticks: usize,
}

impl<S: MarketDataSource, F: FillModel> LiveSession<S, F> {
    pub fn new(
        config: &Config,
        market: &str,
        initial_capital: f64,
        source: S,
        fills: F,
    ) -> Result<Self, ConfigError> {
        let engine = TradingEngine::new(config, market, initial_capital)?;
        info!(
            market,
            strategy = engine.router().name(),
            capital = initial_capital,
            "Live session ready"
        );
        Ok(Self {
            engine,
            clock: Box::new(Utc::now),
            source,
            fills,
            max_lookback: config.indicators.max_lookback,
            min_history: config.indicators.min_history.max(1),
            session_id: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            history: None,
            ticks: 0,
        })
    }

    /// Replace the wall clock used to stamp ticks
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn engine(&self) -> &TradingEngine {
        &self.engine
    }

    /// Limit deployable notional, e.g. to the available quote balance
    pub fn cap_trade_amount(&mut self, limit: f64) {
        self.engine.cap_trade_amount(limit);
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    fn fetch_history(&self) -> Result<MarketHistory, ExchangeError> {
        let market = self.engine.market();
        let fetch = |tf: Timeframe| self.source.get_candles(market, tf, CANDLES_PER_REQUEST, None);
        let primary = fetch(Timeframe::M5)?;
        let confirm_15m = fetch(Timeframe::M15)?;
        let confirm_1h = fetch(Timeframe::H1)?;
        Ok(MarketHistory::new(primary).with_confirmation(confirm_15m, confirm_1h))
    }

    fn fetch_quote(&self) -> MarketQuote {
        let market = self.engine.market();
        let price = match self.source.current_price(market) {
            Ok(price) => Some(price),
            Err(e) => {
                debug!(market, error = %e, "Ticker unavailable, using last close");
                None
            }
        };
        let pressure = self.source.order_book_pressure(market).unwrap_or_else(|e| {
            debug!(market, error = %e, "Order book unavailable");
            None
        });
        MarketQuote { price, pressure }
    }

    /// Run one tick. Returns `None` when the tick was abandoned because
    /// market data could not be fetched.
    pub fn tick(&mut self) -> Option<TickOutcome> {
        let market = self.engine.market().to_string();
        let history = match self.fetch_history() {
            Ok(history) => history,
            Err(e) => {
                warn!(market = %market, error = %e, "Market data fetch failed, skipping tick");
                return None;
            }
        };
        if history.len() < self.min_history {
            warn!(
                market = %market,
                bars = history.len(),
                required = self.min_history,
                "Not enough candles, skipping tick"
            );
            return None;
        }

        let quote = self.fetch_quote();
        let window = history.window(history.len() - 1, self.max_lookback);
        // The latest candle is still forming; the tick happens now
        let now = (self.clock)();
        let outcome = self.engine.process_tick(&window, now, quote, &self.fills, true);
        self.ticks += 1;

        if let Some(snapshot) = self.engine.last_snapshot() {
            info!(
                market = %market,
                tick = self.ticks,
                price = snapshot.current_price,
                mode = %self.engine.current_mode(),
                positions = self.engine.ledger().open_count(),
                capital = self.engine.ledger().capital(),
                "Tick complete"
            );
        }
        self.history = Some(history);
        Some(outcome)
    }

    /// Tick until `stop` is set. The flag is checked between ticks only, so
    /// a tick in progress always completes.
    pub fn run(&mut self, stop: &AtomicBool, interval: Duration) {
        info!(
            market = self.engine.market(),
            interval_secs = interval.as_secs(),
            "Entering trading loop"
        );
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            sleep_unless_stopped(stop, interval);
        }
        info!(market = self.engine.market(), ticks = self.ticks, "Trading loop stopped");
    }

    /// Close every open position at the current price and summarize the session
    pub fn stop(&mut self) -> RunResults {
        let market = self.engine.market().to_string();
        let open = self.engine.ledger().open_count();
        if open > 0 {
            info!(market = %market, open, "Closing open positions");
            if let Ok(history) = self.fetch_history() {
                self.history = Some(history);
            }
            let quote = self.fetch_quote();
            let history = self.history.take().unwrap_or_default();
            let window = if history.is_empty() {
                Default::default()
            } else {
                history.window(history.len() - 1, self.max_lookback)
            };
            let now = (self.clock)();
            let closed: Vec<Trade> =
                self.engine
                    .force_close_all(&window, quote, now, MANUAL_STOP, &self.fills);
            info!(market = %market, closed = closed.len(), "Positions closed");
        }
        RunResults::from_engine(&self.engine, RunMode::Live, self.session_id.clone())
    }
}

fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) {
    let step = Duration::from_millis(250);
    let mut waited = Duration::ZERO;
    while waited < interval && !stop.load(Ordering::SeqCst) {
        let nap = step.min(interval - waited);
        std::thread::sleep(nap);
        waited += nap;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulatedFills;
    use crate::exchange::{FillResult, OrderSize};
    use crate::types::{Candle, ExitKind, Side};
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone};
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::sync::atomic::AtomicI64;

    struct FlatSource {
        fail: Cell<bool>,
        price: Cell<f64>,
    }

    impl FlatSource {
        fn new(price: f64) -> Self {
            Self {
                fail: Cell::new(false),
                price: Cell::new(price),
            }
        }
    }

    impl MarketDataSource for FlatSource {
        fn get_candles(
            &self,
            _market: &str,
            timeframe: Timeframe,
            count: usize,
            _before: Option<DateTime<Utc>>,
        ) -> Result<Vec<Candle>, ExchangeError> {
            if self.fail.get() {
                return Err(ExchangeError::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            Ok((0..count)
                .map(|i| {
                    let at = start + ChronoDuration::minutes(timeframe.minutes() * i as i64);
                    Candle::new_unchecked(at, 100.0, 100.0, 100.0, 100.0, 1.0)
                })
                .collect())
        }

        fn current_price(&self, _market: &str) -> Result<f64, ExchangeError> {
            Ok(self.price.get())
        }
    }

    struct Wallet;

    impl OrderGateway for Wallet {
        fn submit_market_order(
            &self,
            _side: Side,
            _market: &str,
            _size: OrderSize,
        ) -> Result<FillResult, ExchangeError> {
            Err(ExchangeError::Unsupported("test wallet".to_string()))
        }

        fn balance(&self, currency: &str) -> Result<f64, ExchangeError> {
            Ok(match currency {
                "KRW" => 500_000.0,
                "BTC" => 2.0,
                _ => 0.0,
            })
        }
    }

    fn session(source: FlatSource) -> LiveSession<FlatSource, SimulatedFills> {
        LiveSession::new(&Config::default(), "KRW-BTC", 1_000_000.0, source, SimulatedFills::new(0.05))
            .unwrap()
    }

    #[test]
    fn test_tick_opens_positions_on_live_data() {
        let mut live = session(FlatSource::new(100.0));
        let outcome = live.tick().unwrap();
        assert!(outcome.opened.is_some());
        assert_eq!(live.ticks(), 1);
        assert_eq!(live.engine().ledger().open_count(), 1);
    }

    #[test]
    fn test_ticks_inside_one_candle_are_stamped_by_the_clock() {
        // Candles stop at 16:35; every tick lands inside that forming bar
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 16, 36, 0).unwrap();
        let calls = AtomicI64::new(0);
        let mut live = session(FlatSource::new(100.0))
            .with_clock(move || start + ChronoDuration::seconds(60 * calls.fetch_add(1, Ordering::SeqCst)));

        live.tick().unwrap();
        assert_eq!(live.engine().ledger().open_count(), 1);
        live.source.price.set(101.5);
        let outcome = live.tick().unwrap();
        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.closed[0].exit_kind, ExitKind::TakeProfit);
        assert_relative_eq!(outcome.closed[0].holding_minutes, 1.0);

        let results = live.stop();
        assert!(!results.trades.is_empty());
        for t in &results.trades {
            assert!(t.entry_time < t.exit_time, "trade {} exits at entry", t.id);
            let elapsed = (t.exit_time - t.entry_time).num_seconds() as f64 / 60.0;
            assert_relative_eq!(t.holding_minutes, elapsed);
        }
    }

    #[test]
    fn test_fetch_failure_abandons_tick_without_closing() {
        let mut live = session(FlatSource::new(100.0));
        live.tick().unwrap();
        live.source.fail.set(true);
        assert!(live.tick().is_none());
        assert_eq!(live.ticks(), 1);
        assert_eq!(live.engine().ledger().open_count(), 1);
    }

    #[test]
    fn test_stop_closes_everything_as_manual_stop() {
        let mut live = session(FlatSource::new(100.0));
        live.tick();
        live.tick();
        let results = live.stop();
        assert_eq!(results.mode, RunMode::Live);
        assert_eq!(results.total_trades, 2);
        assert_eq!(results.open_positions, 0);
        assert!(results
            .trades
            .iter()
            .all(|t| t.exit_kind == ExitKind::Forced && t.exit_reason == MANUAL_STOP));
    }

    #[test]
    fn test_stop_without_data_still_closes_at_last_snapshot() {
        let mut live = session(FlatSource::new(100.0));
        live.tick();
        live.source.fail.set(true);
        let results = live.stop();
        assert_eq!(results.total_trades, 1);
        assert_eq!(results.open_positions, 0);
    }

    #[test]
    fn test_run_returns_once_stopped() {
        let mut live = session(FlatSource::new(100.0));
        let stop = AtomicBool::new(true);
        live.run(&stop, Duration::from_secs(60));
        assert_eq!(live.ticks(), 0);
    }

    #[test]
    fn test_account_capital_includes_held_coins() {
        let (krw, total) = account_capital(&Wallet, &FlatSource::new(100.0), "KRW-BTC").unwrap();
        assert_eq!(krw, 500_000.0);
        assert_eq!(total, 500_200.0);
        assert_eq!(market_currencies("KRW-ETH"), ("KRW", "ETH"));
    }
}
