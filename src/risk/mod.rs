//! Protective order calculators used by the exchange order watchdog

pub mod risk_reward;
pub mod stop_loss;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{ExchangeOrder, Order, OrderUpdate};

pub use risk_reward::{RiskRewardCalculator, RiskRewardTargets};
pub use stop_loss::StopLossCalculator;

/// Relative amount drift below which a protective order is left alone
const AMOUNT_DRIFT_THRESHOLD: Decimal = dec!(0.01);

/// Change needed to bring protective orders in line with a position
#[derive(Debug, Clone, PartialEq)]
pub enum OrderDelta {
    Create(Order),
    Update { id: String, update: OrderUpdate },
}

/// True when `order` covers a size more than 1% away from `position_amount`
pub(crate) fn amount_drifted(order: &ExchangeOrder, position_amount: Decimal) -> bool {
    let wanted = position_amount.abs();
    if wanted.is_zero() {
        return false;
    }

    (order.amount - wanted).abs() / wanted > AMOUNT_DRIFT_THRESHOLD
}
