use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use super::{amount_drifted, OrderDelta};
use crate::domain::{ExchangeOrder, Order, OrderType, OrderUpdate, Position, Side, Ticker};
use crate::services::Tickers;

/// Stop price `percent` away from the entry, on the losing side.
///
/// `None` without an entry, or when the stop would already be marketable
/// against the ticker.
pub fn stop_loss_price(position: &Position, percent: Decimal, ticker: &Ticker) -> Option<Decimal> {
    let entry = position.entry?;
    let distance = percent.abs() / Decimal::ONE_HUNDRED;

    match position.side {
        Side::Long => {
            let price = entry * (Decimal::ONE - distance);
            (price <= ticker.ask).then_some(price)
        }
        Side::Short => {
            let price = entry * (Decimal::ONE + distance);
            (price >= ticker.bid).then_some(price)
        }
    }
}

pub struct StopLossCalculator {
    tickers: Arc<Tickers>,
}

impl StopLossCalculator {
    pub fn new(tickers: Arc<Tickers>) -> Self {
        Self { tickers }
    }

    pub fn calculate_for_position(
        &self,
        exchange: &str,
        position: &Position,
        percent: Decimal,
    ) -> Option<Decimal> {
        let ticker = self.tickers.get(exchange, &position.symbol)?;
        stop_loss_price(position, percent, &ticker)
    }

    /// Deltas that leave exactly one stop order covering the position.
    ///
    /// `orders` are the open orders of the position's symbol. An existing
    /// stop is only resized when its amount drifted more than 1%.
    pub fn sync_stop_loss_order(
        &self,
        exchange: &str,
        position: &Position,
        percent: Decimal,
        orders: &[ExchangeOrder],
    ) -> Vec<OrderDelta> {
        let close_side = position.side.opposite();
        let close_amount = -position.amount;

        let stop = orders
            .iter()
            .find(|o| o.order_type == OrderType::Stop && o.side == close_side);

        match stop {
            Some(stop) if amount_drifted(stop, position.amount) => {
                debug!(
                    "Stop {} for {}:{} covers {}, position is {}",
                    stop.id, exchange, position.symbol, stop.amount, position.amount
                );
                vec![OrderDelta::Update {
                    id: stop.id.clone(),
                    update: OrderUpdate::amount(close_amount),
                }]
            }
            Some(_) => Vec::new(),
            None => {
                let Some(price) = self.calculate_for_position(exchange, position, percent) else {
                    debug!("No stop price for {}:{}", exchange, position.symbol);
                    return Vec::new();
                };

                match Order::stop_loss(&position.symbol, close_side.signed(price), close_amount) {
                    Ok(order) => vec![OrderDelta::Create(order)],
                    Err(e) => {
                        debug!("Stop order for {}:{} not built: {}", exchange, position.symbol, e);
                        Vec::new()
                    }
                }
            }
        }
    }
}
