use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::config::PairsConfig;
use crate::exchange::ExchangeManager;
use crate::services::Tickers;

/// Order size from the configured capital of a pair
pub struct OrderCalculator {
    pairs: PairsConfig,
    tickers: Arc<Tickers>,
    exchanges: Arc<ExchangeManager>,
}

impl OrderCalculator {
    pub fn new(pairs: PairsConfig, tickers: Arc<Tickers>, exchanges: Arc<ExchangeManager>) -> Self {
        Self {
            pairs,
            tickers,
            exchanges,
        }
    }

    /// Unsigned order size for a pair, rounded to the venue lot size.
    ///
    /// `capital` is taken as a base asset amount; `capital_currency` is
    /// converted with the current bid. `None` when nothing positive is
    /// configured or the venue rounds the size away.
    pub fn calculate_order_size(&self, exchange: &str, symbol: &str) -> Option<Decimal> {
        let pair = self.pairs.find(exchange, symbol)?;

        let size = match (pair.capital, pair.capital_currency) {
            (Some(capital), _) if capital > Decimal::ZERO => capital,
            (_, Some(currency)) if currency > Decimal::ZERO => {
                let ticker = self.tickers.get(exchange, symbol)?;
                if ticker.bid <= Decimal::ZERO {
                    return None;
                }
                currency / ticker.bid
            }
            _ => {
                debug!("No capital configured for {}:{}", exchange, symbol);
                return None;
            }
        };

        let venue = self.exchanges.get(exchange)?;
        venue
            .calculate_amount(size, symbol)
            .filter(|amount| *amount > Decimal::ZERO)
    }
}
