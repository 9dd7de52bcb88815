//! Upbit REST client (blocking)
//!
//! Public endpoints: minute candles, ticker, order book.
//! Private endpoints (JWT): accounts and market orders.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::auth::{query_string, Signer};
use super::{FillResult, MarketDataSource, OrderBookPressure, OrderGateway, OrderSize};
use crate::config::ExchangeConfig;
use crate::data::Timeframe;
use crate::error::ExchangeError;
use crate::types::{Candle, Side};

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

impl TryFrom<UpbitCandle> for Candle {
    type Error = ExchangeError;

    fn try_from(c: UpbitCandle) -> Result<Self, Self::Error> {
        let datetime = NaiveDateTime::parse_from_str(&c.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| ExchangeError::Parse(format!("{}: {}", c.candle_date_time_utc, e)))?
            .and_utc();
        Candle::new(
            datetime,
            c.opening_price,
            c.high_price,
            c.low_price,
            c.trade_price,
            c.candle_acc_trade_volume,
        )
        .map_err(|e| ExchangeError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    trade_price: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderbook {
    total_ask_size: f64,
    total_bid_size: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitAccount {
    currency: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct UpbitOrder {
    uuid: String,
    #[serde(default)]
    executed_volume: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpbitClient {
    http: Client,
    base_url: String,
    signer: Option<Signer>,
}

impl UpbitClient {
    /// Client for public market data; private calls fail with an auth error
    pub fn public(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer: None,
        })
    }

    /// Client with trading credentials
    pub fn authenticated(
        config: &ExchangeConfig,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, ExchangeError> {
        let mut client = Self::public(config)?;
        client.signer = Some(Signer::new(access_key, secret_key));
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn signer(&self) -> Result<&Signer, ExchangeError> {
        self.signer
            .as_ref()
            .ok_or_else(|| ExchangeError::Auth("no API credentials configured".to_string()))
    }

    fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ExchangeError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(format!("{}: {}", e, body)))
    }

    fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        Self::send(self.http.get(self.url(path)).query(params))
    }

    fn get_private<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExchangeError> {
        let auth = self.signer()?.authorization("")?;
        Self::send(self.http.get(self.url(path)).header("Authorization", auth))
    }

    fn post_private<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let auth = self.signer()?.authorization(&query_string(params))?;
        let body: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| ((*k).to_string(), serde_json::Value::String(v.clone())))
            .collect();
        Self::send(
            self.http
                .post(self.url(path))
                .header("Authorization", auth)
                .json(&body),
        )
    }
}

impl MarketDataSource for UpbitClient {
    fn get_candles(
        &self,
        market: &str,
        timeframe: Timeframe,
        count: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut params = vec![("market", market.to_string()), ("count", count.to_string())];
        if let Some(to) = before {
            params.push(("to", to.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        let path = format!("/candles/minutes/{}", timeframe.minutes());
        let raw: Vec<UpbitCandle> = self.get_public(&path, &params)?;
        debug!(market, timeframe = %timeframe, received = raw.len(), "Candles received");

        let mut candles = raw
            .into_iter()
            .map(Candle::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.datetime);
        Ok(candles)
    }

    fn current_price(&self, market: &str) -> Result<f64, ExchangeError> {
        let tickers: Vec<UpbitTicker> =
            self.get_public("/ticker", &[("markets", market.to_string())])?;
        tickers
            .first()
            .map(|t| t.trade_price)
            .ok_or_else(|| ExchangeError::Parse(format!("empty ticker for {}", market)))
    }

    fn order_book_pressure(&self, market: &str) -> Result<Option<OrderBookPressure>, ExchangeError> {
        let books: Vec<UpbitOrderbook> =
            self.get_public("/orderbook", &[("markets", market.to_string())])?;
        Ok(books.first().and_then(|book| {
            let total = book.total_bid_size + book.total_ask_size;
            (book.total_ask_size > 0.0 && total > 0.0).then(|| OrderBookPressure {
                bid_ask_ratio: book.total_bid_size / book.total_ask_size,
                imbalance: (book.total_bid_size - book.total_ask_size) / total,
            })
        }))
    }
}

impl OrderGateway for UpbitClient {
    fn submit_market_order(
        &self,
        side: Side,
        market: &str,
        size: OrderSize,
    ) -> Result<FillResult, ExchangeError> {
        let params = match (side, size) {
            (Side::Buy, OrderSize::Notional(amount)) => vec![
                ("market", market.to_string()),
                ("side", "bid".to_string()),
                ("price", format!("{:.0}", amount.floor())),
                ("ord_type", "price".to_string()),
            ],
            (Side::Sell, OrderSize::Quantity(volume)) => vec![
                ("market", market.to_string()),
                ("side", "ask".to_string()),
                ("volume", format!("{:.8}", volume)),
                ("ord_type", "market".to_string()),
            ],
            (side, size) => {
                return Err(ExchangeError::Unsupported(format!(
                    "market {:?} order sized by {:?}",
                    side, size
                )))
            }
        };

        let order: UpbitOrder = self.post_private("/orders", &params)?;
        info!(market, side = ?side, order_id = %order.uuid, "Order accepted");
        Ok(FillResult {
            order_id: order.uuid,
            average_price: order.avg_price.and_then(|p| p.parse().ok()),
            executed_quantity: order
                .executed_volume
                .and_then(|v| v.parse().ok())
                .filter(|v: &f64| *v > 0.0),
        })
    }

    fn balance(&self, currency: &str) -> Result<f64, ExchangeError> {
        let accounts: Vec<UpbitAccount> = self.get_private("/accounts")?;
        Ok(accounts
            .iter()
            .find(|a| a.currency == currency)
            .and_then(|a| a.balance.parse().ok())
            .unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_conversion() {
        let raw: UpbitCandle = serde_json::from_str(
            r#"{
                "market": "KRW-BTC",
                "candle_date_time_utc": "2024-03-01T12:05:00",
                "candle_date_time_kst": "2024-03-01T21:05:00",
                "opening_price": 100.0,
                "high_price": 110.0,
                "low_price": 95.0,
                "trade_price": 105.0,
                "candle_acc_trade_volume": 3.5
            }"#,
        )
        .unwrap();
        let candle = Candle::try_from(raw).unwrap();
        assert_eq!(candle.datetime.to_rfc3339(), "2024-03-01T12:05:00+00:00");
        assert_eq!(candle.close, 105.0);
        assert_eq!(candle.volume, 3.5);
    }

    #[test]
    fn test_invalid_candle_is_parse_error() {
        let raw = UpbitCandle {
            candle_date_time_utc: "2024-03-01T12:05:00".to_string(),
            opening_price: 100.0,
            high_price: 90.0,
            low_price: 95.0,
            trade_price: 92.0,
            candle_acc_trade_volume: 1.0,
        };
        assert!(matches!(Candle::try_from(raw), Err(ExchangeError::Parse(_))));
    }

    #[test]
    fn test_private_calls_need_credentials() {
        let client = UpbitClient::public(&ExchangeConfig::default()).unwrap();
        assert!(matches!(client.balance("KRW"), Err(ExchangeError::Auth(_))));
    }

    #[test]
    fn test_sell_by_notional_is_rejected() {
        let client = UpbitClient::public(&ExchangeConfig::default()).unwrap();
        let result = client.submit_market_order(Side::Sell, "KRW-BTC", OrderSize::Notional(1.0));
        assert!(matches!(result, Err(ExchangeError::Unsupported(_))));
    }
}
