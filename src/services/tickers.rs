//! Latest bid/ask per pair, shared by the executor, calculators and watchdog

use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::domain::{PairKey, Side, Ticker};

/// Concurrent ticker store keyed by (exchange, symbol)
#[derive(Debug, Default)]
pub struct Tickers {
    tickers: DashMap<PairKey, Ticker>,
}

impl Tickers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, ticker: Ticker) {
        let key = PairKey::new(&ticker.exchange, &ticker.symbol);
        self.tickers.insert(key, ticker);
    }

    pub fn get(&self, exchange: &str, symbol: &str) -> Option<Ticker> {
        self.tickers
            .get(&PairKey::new(exchange, symbol))
            .map(|t| t.value().clone())
    }

    /// Ticker only when it is not older than `max_age_ms`
    pub fn get_if_up_to_date(&self, exchange: &str, symbol: &str, max_age_ms: i64) -> Option<Ticker> {
        self.get(exchange, symbol)
            .filter(|ticker| ticker.age_ms() <= max_age_ms)
    }

    /// Signed front-of-book price for an order side (see `Ticker::price_for_side`)
    pub fn price_for_side(&self, exchange: &str, symbol: &str, side: Side) -> Option<Decimal> {
        self.get(exchange, symbol).map(|t| t.price_for_side(side))
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }
}
