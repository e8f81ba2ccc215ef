use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Best bid/ask snapshot for a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: String,
    pub symbol: String,
    pub bid: Decimal,
    pub ask: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Ticker {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        bid: Decimal,
        ask: Decimal,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            bid,
            ask,
            created_at: Utc::now(),
        }
    }

    /// Front-of-book reference price for an order side: bid for long,
    /// negated ask for short (sign carries the side into order construction)
    pub fn price_for_side(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.bid,
            Side::Short => -self.ask,
        }
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}
