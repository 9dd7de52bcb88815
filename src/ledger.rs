//! Position Ledger
//!
//! Owns the capital, the open positions and the closed trade history of one
//! engine. All capital movements go through [`PositionLedger::open_position`]
//! and [`PositionLedger::close_position`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::LedgerError;
use crate::strategies::EntrySignal;
use crate::types::{Direction, ExitKind, IndicatorSnapshot, Position, SubStrategy, Trade};

/// A confirmed execution, from the simulator or the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
    /// Pre-fee notional in quote currency
    pub notional: f64,
    pub fee: f64,
    pub order_id: Option<String>,
}

/// Closed-trade aggregate for one calendar date (UTC)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Sum of the day's trade profit rates, percent
    pub total_profit: f64,
}

impl DailyStat {
    fn new(date: NaiveDate) -> Self {
        Self {
            date,
            trades: 0,
            wins: 0,
            losses: 0,
            total_profit: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Open,
    Close,
}

/// One record per open and per close, carrying the indicator readings at
/// the time for later reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub kind: EventKind,
    pub position_id: u64,
    pub time: DateTime<Utc>,
    pub sub_strategy: SubStrategy,
    pub direction: Direction,
    pub price: f64,
    pub quantity: f64,
    pub amount: f64,
    pub fee: f64,
    pub profit: Option<f64>,
    pub profit_rate: Option<f64>,
    pub reason: String,
    pub snapshot: IndicatorSnapshot,
}

/// Daily trade cap and post-trade cooldown
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeLimits {
    pub cooldown_minutes: i64,
    pub max_trades_per_day: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PositionLedger {
    market: String,
    initial_capital: f64,
    capital: f64,
    positions: Vec<Position>,
    trades: Vec<Trade>,
    daily_stats: BTreeMap<NaiveDate, DailyStat>,
    trade_date: Option<NaiveDate>,
    trades_today: u32,
    last_trade_time: Option<DateTime<Utc>>,
    events: Vec<TradeEvent>,
    next_id: u64,
}

impl PositionLedger {
    pub fn new(market: impl Into<String>, initial_capital: f64) -> Self {
        Self {
            market: market.into(),
            initial_capital,
            capital: initial_capital,
            positions: Vec::new(),
            trades: Vec::new(),
            daily_stats: BTreeMap::new(),
            trade_date: None,
            trades_today: 0,
            last_trade_time: None,
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Uninvested quote currency
    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Mutable access for running-extrema updates during exit checks
    pub fn position_mut(&mut self, index: usize) -> Option<&mut Position> {
        self.positions.get_mut(index)
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn daily_stats(&self) -> Vec<DailyStat> {
        self.daily_stats.values().cloned().collect()
    }

    pub fn events(&self) -> &[TradeEvent] {
        &self.events
    }

    /// Buys recorded on the calendar date of `now`
    pub fn trades_on(&self, now: DateTime<Utc>) -> u32 {
        if self.trade_date == Some(now.date_naive()) {
            self.trades_today
        } else {
            0
        }
    }

    /// `Err` carries the gating reason
    pub fn can_trade(&self, now: DateTime<Utc>, limits: TradeLimits) -> Result<(), String> {
        if let Some(max) = limits.max_trades_per_day {
            let today = self.trades_on(now);
            if today >= max {
                return Err(format!("daily trade limit reached ({}/{})", today, max));
            }
        }
        if limits.cooldown_minutes > 0 {
            if let Some(last) = self.last_trade_time {
                let elapsed = (now - last).num_minutes();
                if elapsed < limits.cooldown_minutes {
                    return Err(format!(
                        "cooldown ({} of {} min)",
                        elapsed, limits.cooldown_minutes
                    ));
                }
            }
        }
        Ok(())
    }

    /// Sum of unrealized profit rates (percent) of all open positions
    pub fn total_profit_rate(&self, price: f64) -> f64 {
        self.positions.iter().map(|p| p.profit_rate(price)).sum()
    }

    /// Capital plus the marked value of open positions
    pub fn equity(&self, price: f64) -> f64 {
        self.capital
            + self
                .positions
                .iter()
                .map(|p| p.market_value(price))
                .sum::<f64>()
    }

    /// Record a new position. Capital is debited by the pre-fee notional.
    pub fn open_position(
        &mut self,
        signal: &EntrySignal,
        fill: Fill,
        time: DateTime<Utc>,
        snapshot: IndicatorSnapshot,
    ) -> &Position {
        let id = self.next_id;
        self.next_id += 1;

        let amount = fill.notional - fill.fee;
        self.capital -= fill.notional;

        let date = time.date_naive();
        if self.trade_date != Some(date) {
            self.trade_date = Some(date);
            self.trades_today = 0;
        }
        self.trades_today += 1;
        self.last_trade_time = Some(time);

        let position = Position {
            id,
            sub_strategy: signal.sub_strategy,
            direction: signal.direction,
            entry_price: fill.price,
            entry_time: time,
            quantity: fill.quantity,
            gross_amount: fill.notional,
            amount,
            entry_fee: fill.fee,
            target_profit: signal.target_profit,
            entry_grid_level: signal.grid_level,
            peak_price: fill.price,
            trough_price: fill.price,
            entry_reason: signal.reason.clone(),
            entry_snapshot: snapshot,
        };

        info!(
            market = %self.market,
            id,
            sub_strategy = %position.sub_strategy,
            direction = %position.direction,
            price = fill.price,
            quantity = fill.quantity,
            amount,
            open = self.positions.len() + 1,
            reason = %position.entry_reason,
            "Position opened"
        );

        self.events.push(TradeEvent {
            kind: EventKind::Open,
            position_id: id,
            time,
            sub_strategy: position.sub_strategy,
            direction: position.direction,
            price: fill.price,
            quantity: fill.quantity,
            amount,
            fee: fill.fee,
            profit: None,
            profit_rate: None,
            reason: position.entry_reason.clone(),
            snapshot: position.entry_snapshot.clone(),
        });

        self.positions.push(position);
        let last = self.positions.len() - 1;
        &self.positions[last]
    }

    /// Close the position at `index`, crediting capital and appending a trade
    pub fn close_position(
        &mut self,
        index: usize,
        fill: Fill,
        time: DateTime<Utc>,
        kind: ExitKind,
        reason: &str,
        snapshot: IndicatorSnapshot,
    ) -> Result<Trade, LedgerError> {
        if index >= self.positions.len() {
            return Err(LedgerError::PositionNotFound {
                index,
                open: self.positions.len(),
            });
        }
        let position = self.positions.remove(index);

        let net_amount = match position.direction {
            Direction::Long => fill.quantity * fill.price - fill.fee,
            Direction::Short => {
                position.amount + position.quantity * (position.entry_price - fill.price) - fill.fee
            }
        };
        let profit = net_amount - position.amount;
        let profit_rate = if position.amount > 0.0 {
            profit / position.amount * 100.0
        } else {
            0.0
        };
        self.capital += net_amount;
        self.last_trade_time = Some(time);

        let trade = Trade {
            id: position.id,
            market: self.market.clone(),
            sub_strategy: position.sub_strategy,
            direction: position.direction,
            entry_time: position.entry_time,
            exit_time: time,
            entry_price: position.entry_price,
            exit_price: fill.price,
            quantity: position.quantity,
            amount: position.amount,
            entry_fee: position.entry_fee,
            exit_fee: fill.fee,
            net_amount,
            profit,
            profit_rate,
            holding_minutes: position.holding_minutes(time),
            exit_kind: kind,
            exit_reason: reason.to_string(),
            entry_reason: position.entry_reason,
            entry_grid_level: position.entry_grid_level,
            entry_snapshot: position.entry_snapshot,
            exit_snapshot: snapshot,
        };

        let stat = self
            .daily_stats
            .entry(time.date_naive())
            .or_insert_with(|| DailyStat::new(time.date_naive()));
        stat.trades += 1;
        if trade.is_win() {
            stat.wins += 1;
        } else {
            stat.losses += 1;
        }
        stat.total_profit += profit_rate;

        info!(
            market = %self.market,
            id = trade.id,
            sub_strategy = %trade.sub_strategy,
            price = fill.price,
            profit_rate = %format!("{:+.2}%", profit_rate),
            profit,
            remaining = self.positions.len(),
            reason,
            "Position closed"
        );

        self.events.push(TradeEvent {
            kind: EventKind::Close,
            position_id: trade.id,
            time,
            sub_strategy: trade.sub_strategy,
            direction: trade.direction,
            price: fill.price,
            quantity: trade.quantity,
            amount: net_amount,
            fee: fill.fee,
            profit: Some(profit),
            profit_rate: Some(profit_rate),
            reason: trade.exit_reason.clone(),
            snapshot: trade.exit_snapshot.clone(),
        });
        self.trades.push(trade.clone());

        Ok(trade)
    }
}
