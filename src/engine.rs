//! Tick-driven trading engine shared by backtest and live trading
//!
//! Each tick runs to completion in a fixed order: trading-hours filter,
//! snapshot, exits over open positions in reverse index order, then at most
//! one new entry. Backtest and live differ only in where candles and tick
//! times come from and which [`FillModel`] executes orders.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::data::HistoryWindow;
use crate::error::{ConfigError, ExchangeError};
use crate::exchange::{OrderBookPressure, OrderGateway, OrderSize};
use crate::ledger::{Fill, PositionLedger, TradeLimits};
use crate::snapshot::{IndicatorAdapter, MarketSnapshot};
use crate::strategies::{self, EntryContext, EntryDecision, EntrySignal, ExitDecision, StrategyRouter};
use crate::time_filter::TimeFilter;
use crate::types::{Direction, ExitKind, MarketMode, Position, Side, SubStrategy, Trade};
use crate::Config;

/// Forced-close reason at the end of historical data
pub const PERIOD_END: &str = "period end";
/// Forced-close reason when a live session is stopped
pub const MANUAL_STOP: &str = "manual stop";

/// Executes entries and exits
pub trait FillModel {
    fn open(
        &self,
        market: &str,
        direction: Direction,
        price: f64,
        notional: f64,
    ) -> Result<Fill, ExchangeError>;

    fn close(&self, market: &str, position: &Position, price: f64) -> Result<Fill, ExchangeError>;
}

/// Fills at the quoted price with a percentage fee on each leg
#[derive(Debug, Clone, Copy)]
pub struct SimulatedFills {
    fee_rate: f64,
}

impl SimulatedFills {
    /// `fee_rate` in percent (0.05 = 0.05%)
    pub fn new(fee_rate: f64) -> Self {
        Self { fee_rate }
    }

    fn fee(&self, notional: f64) -> f64 {
        notional * self.fee_rate / 100.0
    }
}

impl FillModel for SimulatedFills {
    fn open(
        &self,
        _market: &str,
        _direction: Direction,
        price: f64,
        notional: f64,
    ) -> Result<Fill, ExchangeError> {
        if price <= 0.0 {
            return Err(ExchangeError::Parse(format!("invalid fill price {}", price)));
        }
        let fee = self.fee(notional);
        Ok(Fill {
            price,
            quantity: (notional - fee) / price,
            notional,
            fee,
            order_id: None,
        })
    }

    fn close(&self, _market: &str, position: &Position, price: f64) -> Result<Fill, ExchangeError> {
        let gross = position.market_value(price);
        Ok(Fill {
            price,
            quantity: position.quantity,
            notional: gross,
            fee: self.fee(gross),
            order_id: None,
        })
    }
}

/// Routes fills through a real exchange. Spot only: short entries are refused.
#[derive(Debug, Clone)]
pub struct GatewayFills<G> {
    gateway: G,
    fee_rate: f64,
}

impl<G: OrderGateway> GatewayFills<G> {
    pub fn new(gateway: G, fee_rate: f64) -> Self {
        Self { gateway, fee_rate }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}

impl<G: OrderGateway> FillModel for GatewayFills<G> {
    fn open(
        &self,
        market: &str,
        direction: Direction,
        price: f64,
        notional: f64,
    ) -> Result<Fill, ExchangeError> {
        if direction == Direction::Short {
            return Err(ExchangeError::Unsupported(
                "short positions on a spot exchange".to_string(),
            ));
        }
        let result = self
            .gateway
            .submit_market_order(Side::Buy, market, OrderSize::Notional(notional))?;
        let fill_price = result.average_price.unwrap_or(price);
        let fee = notional * self.fee_rate / 100.0;
        let quantity = result
            .executed_quantity
            .unwrap_or((notional - fee) / fill_price);
        Ok(Fill {
            price: fill_price,
            quantity,
            notional,
            fee,
            order_id: Some(result.order_id),
        })
    }

    fn close(&self, market: &str, position: &Position, price: f64) -> Result<Fill, ExchangeError> {
        if position.direction == Direction::Short {
            return Err(ExchangeError::Unsupported(
                "short positions on a spot exchange".to_string(),
            ));
        }
        let result = self.gateway.submit_market_order(
            Side::Sell,
            market,
            OrderSize::Quantity(position.quantity),
        )?;
        let fill_price = result.average_price.unwrap_or(price);
        let quantity = result.executed_quantity.unwrap_or(position.quantity);
        let gross = quantity * fill_price;
        Ok(Fill {
            price: fill_price,
            quantity,
            notional: gross,
            fee: gross * self.fee_rate / 100.0,
            order_id: Some(result.order_id),
        })
    }
}

/// Live readings that replace the candle-derived values for one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketQuote {
    pub price: Option<f64>,
    pub pressure: Option<OrderBookPressure>,
}

/// Ticks spent in each market mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCounts {
    pub range: usize,
    pub trend: usize,
    pub neutral: usize,
}

impl ModeCounts {
    pub fn record(&mut self, mode: MarketMode) {
        match mode {
            MarketMode::Range => self.range += 1,
            MarketMode::Trend => self.trend += 1,
            MarketMode::Neutral => self.neutral += 1,
        }
    }

    pub fn get(&self, mode: MarketMode) -> usize {
        match mode {
            MarketMode::Range => self.range,
            MarketMode::Trend => self.trend,
            MarketMode::Neutral => self.neutral,
        }
    }

    pub fn total(&self) -> usize {
        self.range + self.trend + self.neutral
    }
}

/// Position sizing and gating, resolved once per engine
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Total notional the strategy may deploy
    pub trade_amount: f64,
    pub max_positions: usize,
    pub breakout_fraction: f64,
    pub limits: TradeLimits,
}

impl EngineSettings {
    pub fn from_config(config: &Config, capital: f64) -> Self {
        Self {
            trade_amount: config.trading.resolved_trade_amount(capital),
            max_positions: config.trading.max_positions,
            breakout_fraction: config.breakout.position_fraction,
            limits: TradeLimits {
                cooldown_minutes: config.trading.cooldown_minutes,
                max_trades_per_day: config.trading.max_trades_per_day,
            },
        }
    }

    /// Grid entries split the trade amount across the position slots;
    /// breakout entries take a fraction of one slot
    pub fn notional_for(&self, sub_strategy: SubStrategy) -> f64 {
        let slot = self.trade_amount / self.max_positions.max(1) as f64;
        match sub_strategy {
            SubStrategy::Grid => slot,
            SubStrategy::Breakout => slot * self.breakout_fraction,
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// Set when the tick was skipped before evaluation
    pub skipped: Option<String>,
    pub mode: Option<MarketMode>,
    pub closed: Vec<Trade>,
    pub opened: Option<u64>,
}

impl TickOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped: Some(reason.into()),
            ..Default::default()
        }
    }
}

/// One market's complete trading state. Engines never share state.
#[derive(Debug, Clone)]
pub struct TradingEngine {
    market: String,
    settings: EngineSettings,
    router: StrategyRouter,
    adapter: IndicatorAdapter,
    time_filter: TimeFilter,
    ledger: PositionLedger,
    current_mode: MarketMode,
    mode_counts: ModeCounts,
    rejections: HashMap<String, usize>,
    last_snapshot: Option<MarketSnapshot>,
}

impl TradingEngine {
    /// Build an engine for `market` with the strategy named in the config
    pub fn new(config: &Config, market: &str, initial_capital: f64) -> Result<Self, ConfigError> {
        let router = strategies::create_router(config)?;
        let time_filter = TimeFilter::new(config.time_filter.clone())?;
        let adapter = IndicatorAdapter::new(
            config.indicators.clone(),
            config.trend_filter.clone(),
            config.breakout.std_period,
        );
        Ok(Self {
            market: market.to_string(),
            settings: EngineSettings::from_config(config, initial_capital),
            router,
            adapter,
            time_filter,
            ledger: PositionLedger::new(market, initial_capital),
            current_mode: MarketMode::default(),
            mode_counts: ModeCounts::default(),
            rejections: HashMap::new(),
            last_snapshot: None,
        })
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Cap the deployable notional (live trading limits it to the quote balance)
    pub fn cap_trade_amount(&mut self, limit: f64) {
        self.settings.trade_amount = self.settings.trade_amount.min(limit);
    }

    pub fn router(&self) -> &StrategyRouter {
        &self.router
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn current_mode(&self) -> MarketMode {
        self.current_mode
    }

    pub fn mode_counts(&self) -> ModeCounts {
        self.mode_counts
    }

    pub fn last_snapshot(&self) -> Option<&MarketSnapshot> {
        self.last_snapshot.as_ref()
    }

    /// Most frequent entry rejection reasons, highest count first
    pub fn top_rejections(&self, limit: usize) -> Vec<(String, usize)> {
        self.rejections
            .iter()
            .map(|(reason, count)| (reason.clone(), *count))
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(limit)
            .collect()
    }

    fn record_rejection(&mut self, reason: &str) {
        debug!(market = %self.market, reason, "Entry rejected");
        let key = reason.split('(').next().unwrap_or(reason).trim().to_string();
        *self.rejections.entry(key).or_insert(0) += 1;
    }

    fn snapshot_for(&mut self, window: &HistoryWindow<'_>, quote: MarketQuote) -> Option<MarketSnapshot> {
        let mut snapshot = self.adapter.snapshot(window)?;
        if let Some(price) = quote.price.filter(|p| *p > 0.0) {
            snapshot.current_price = price;
        }
        if let Some(pressure) = quote.pressure {
            snapshot.bid_ask_ratio = Some(pressure.bid_ask_ratio);
            snapshot.bid_imbalance = Some(pressure.imbalance);
        }
        self.refresh_portfolio(&mut snapshot);
        Some(snapshot)
    }

    fn refresh_portfolio(&self, snapshot: &mut MarketSnapshot) {
        snapshot.active_positions = self.ledger.open_count();
        snapshot.total_profit_rate = self.ledger.total_profit_rate(snapshot.current_price);
    }

    /// Evaluate one tick stamped `now`. The backtest passes the bar's
    /// timestamp, live trading the wall clock. Entries are only considered when
    /// `allow_entry`.
    pub fn process_tick<F: FillModel + ?Sized>(
        &mut self,
        window: &HistoryWindow<'_>,
        now: DateTime<Utc>,
        quote: MarketQuote,
        fills: &F,
        allow_entry: bool,
    ) -> TickOutcome {
        if window.last().is_none() {
            return TickOutcome::skipped("no market data");
        }
        if !self.time_filter.is_trading_time(now) {
            return TickOutcome::skipped("outside trading hours");
        }
        let Some(mut snapshot) = self.snapshot_for(window, quote) else {
            return TickOutcome::skipped("no market data");
        };
        snapshot.timestamp = now;

        let mode = self.router.classify(&snapshot);
        if mode != self.current_mode {
            debug!(market = %self.market, from = %self.current_mode, to = %mode, "Market mode changed");
            self.current_mode = mode;
        }
        let mut outcome = TickOutcome {
            mode: Some(mode),
            ..Default::default()
        };

        // Reverse order keeps the remaining indices valid after a removal
        for index in (0..self.ledger.open_count()).rev() {
            let decision = {
                let Some(position) = self.ledger.position_mut(index) else {
                    continue;
                };
                let holding = position.holding_minutes(now);
                self.router.exit_check(position, &snapshot, holding)
            };
            if let ExitDecision::Close { kind, reason } = decision {
                if let Some(trade) = self.close_at(index, &snapshot, now, kind, &reason, mode, fills) {
                    outcome.closed.push(trade);
                }
            }
        }
        self.refresh_portfolio(&mut snapshot);

        if allow_entry {
            outcome.opened = self.try_entry(&snapshot, mode, now, fills);
        }

        self.mode_counts.record(mode);
        self.last_snapshot = Some(snapshot);
        outcome
    }

    fn try_entry<F: FillModel + ?Sized>(
        &mut self,
        snapshot: &MarketSnapshot,
        mode: MarketMode,
        now: DateTime<Utc>,
        fills: &F,
    ) -> Option<u64> {
        if let Err(reason) = self.ledger.can_trade(now, self.settings.limits) {
            self.record_rejection(&reason);
            return None;
        }
        if self.ledger.open_count() >= self.settings.max_positions {
            let reason = format!(
                "max positions reached ({}/{})",
                self.ledger.open_count(),
                self.settings.max_positions
            );
            self.record_rejection(&reason);
            return None;
        }

        let ctx = EntryContext {
            snapshot,
            mode,
        };
        let signal = match self.router.entry_check(&ctx) {
            EntryDecision::Enter(signal) => signal,
            EntryDecision::Reject(reason) => {
                self.record_rejection(&reason);
                return None;
            }
        };
        self.open(signal, snapshot, mode, now, fills)
    }

    fn open<F: FillModel + ?Sized>(
        &mut self,
        signal: EntrySignal,
        snapshot: &MarketSnapshot,
        mode: MarketMode,
        now: DateTime<Utc>,
        fills: &F,
    ) -> Option<u64> {
        let notional = self
            .settings
            .notional_for(signal.sub_strategy)
            .min(self.ledger.capital());
        if notional <= 0.0 {
            self.record_rejection("insufficient capital");
            return None;
        }

        let price = snapshot.current_price;
        match fills.open(&self.market, signal.direction, price, notional) {
            Ok(fill) => {
                let position =
                    self.ledger
                        .open_position(&signal, fill, now, snapshot.capture(mode));
                Some(position.id)
            }
            Err(e) => {
                warn!(
                    market = %self.market,
                    direction = %signal.direction,
                    notional,
                    error = %e,
                    "Entry fill failed"
                );
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn close_at<F: FillModel + ?Sized>(
        &mut self,
        index: usize,
        snapshot: &MarketSnapshot,
        now: DateTime<Utc>,
        kind: ExitKind,
        reason: &str,
        mode: MarketMode,
        fills: &F,
    ) -> Option<Trade> {
        let price = snapshot.current_price;
        let fill = {
            let Some(position) = self.ledger.positions().get(index) else {
                warn!(market = %self.market, index, "Exit requested for a missing position");
                return None;
            };
            match fills.close(&self.market, position, price) {
                Ok(fill) => fill,
                Err(e) => {
                    warn!(market = %self.market, id = position.id, error = %e, "Exit fill failed");
                    return None;
                }
            }
        };
        match self
            .ledger
            .close_position(index, fill, now, kind, reason, snapshot.capture(mode))
        {
            Ok(trade) => Some(trade),
            Err(e) => {
                warn!(market = %self.market, error = %e, "Close ignored");
                None
            }
        }
    }

    /// Close every open position at the latest price. Positions whose exit
    /// fill fails stay open and are reported by the caller.
    pub fn force_close_all<F: FillModel + ?Sized>(
        &mut self,
        window: &HistoryWindow<'_>,
        quote: MarketQuote,
        at: DateTime<Utc>,
        reason: &str,
        fills: &F,
    ) -> Vec<Trade> {
        let mut snapshot = match self.snapshot_for(window, quote) {
            Some(snapshot) => snapshot,
            None => match self.last_snapshot.clone() {
                Some(snapshot) => snapshot,
                None => return Vec::new(),
            },
        };
        snapshot.timestamp = at;
        let mode = self.current_mode;

        let mut closed = Vec::new();
        let mut index = 0;
        while index < self.ledger.open_count() {
            match self.close_at(index, &snapshot, at, ExitKind::Forced, reason, mode, fills) {
                Some(trade) => closed.push(trade),
                None => index += 1,
            }
        }
        if self.ledger.open_count() > 0 {
            warn!(
                market = %self.market,
                remaining = self.ledger.open_count(),
                "Some positions could not be closed"
            );
        }
        closed
    }
}
