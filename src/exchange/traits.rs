use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{ExchangeOrder, Order, OrderUpdate, Position, SubmitOutcome};
use crate::error::Result;

/// Venue adapter consumed by the engine, one implementation per exchange
///
/// Every async call is a suspension point and may fail; callers in the engine
/// log failures and degrade to "no action this tick".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Submit an order. The outcome says whether the venue holds it, wants a
    /// resubmission, or refused it for good.
    async fn order(&self, order: &Order) -> Result<SubmitOutcome>;

    async fn cancel_order(&self, id: &str) -> Result<Option<ExchangeOrder>>;

    async fn cancel_all(&self, symbol: &str) -> Result<Vec<ExchangeOrder>>;

    async fn update_order(&self, id: &str, update: &OrderUpdate) -> Result<ExchangeOrder>;

    async fn find_order_by_id(&self, id: &str) -> Result<Option<ExchangeOrder>>;

    /// Open orders across all symbols
    async fn get_orders(&self) -> Result<Vec<ExchangeOrder>>;

    /// Open orders for one symbol
    async fn get_orders_for_symbol(&self, symbol: &str) -> Result<Vec<ExchangeOrder>>;

    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn get_position_for_symbol(&self, symbol: &str) -> Result<Option<Position>>;

    /// Round a (signed) price to the venue tick size
    fn calculate_price(&self, price: Decimal, symbol: &str) -> Option<Decimal>;

    /// Round a (signed) amount to the venue lot size
    fn calculate_amount(&self, amount: Decimal, symbol: &str) -> Option<Decimal>;
}
