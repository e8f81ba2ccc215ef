use rust_decimal::Decimal;
use tracing::debug;

use super::{amount_drifted, OrderDelta};
use crate::domain::{ExchangeOrder, Order, OrderType, OrderUpdate, Position, Side};

/// Stop and take-profit prices around a position entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskRewardTargets {
    pub stop: Decimal,
    pub target: Decimal,
}

/// Keeps a stop order and a take-profit order around each position
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskRewardCalculator;

impl RiskRewardCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Long: stop below and target above the entry; short: mirrored
    pub fn calculate_for_position(
        &self,
        position: &Position,
        stop_percent: Decimal,
        target_percent: Decimal,
    ) -> Option<RiskRewardTargets> {
        let entry = position.entry?;
        let stop = stop_percent.abs() / Decimal::ONE_HUNDRED;
        let target = target_percent.abs() / Decimal::ONE_HUNDRED;

        Some(match position.side {
            Side::Long => RiskRewardTargets {
                stop: entry * (Decimal::ONE - stop),
                target: entry * (Decimal::ONE + target),
            },
            Side::Short => RiskRewardTargets {
                stop: entry * (Decimal::ONE + stop),
                target: entry * (Decimal::ONE - target),
            },
        })
    }

    /// Deltas that leave one stop and one take-profit order covering the
    /// position; existing orders are resized only past a 1% amount drift.
    pub fn sync_ratio_reward_orders(
        &self,
        position: &Position,
        stop_percent: Decimal,
        target_percent: Decimal,
        orders: &[ExchangeOrder],
    ) -> Vec<OrderDelta> {
        let Some(targets) = self.calculate_for_position(position, stop_percent, target_percent)
        else {
            debug!("Position {} has no entry, no risk/reward orders", position.symbol);
            return Vec::new();
        };

        let close_side = position.side.opposite();
        let close_amount = -position.amount;
        let mut deltas = Vec::new();

        let closing = |order_type: OrderType| {
            orders
                .iter()
                .find(|o| o.order_type == order_type && o.side == close_side)
        };

        match closing(OrderType::Stop) {
            Some(stop) if amount_drifted(stop, position.amount) => deltas.push(OrderDelta::Update {
                id: stop.id.clone(),
                update: OrderUpdate::amount(close_amount),
            }),
            Some(_) => {}
            None => {
                if let Ok(order) =
                    Order::stop_loss(&position.symbol, close_side.signed(targets.stop), close_amount)
                {
                    deltas.push(OrderDelta::Create(order));
                }
            }
        }

        match closing(OrderType::Limit) {
            Some(target) if amount_drifted(target, position.amount) => {
                deltas.push(OrderDelta::Update {
                    id: target.id.clone(),
                    update: OrderUpdate::amount(close_amount),
                })
            }
            Some(_) => {}
            None => {
                if let Ok(order) = Order::close_limit_post_only_reduce(
                    &position.symbol,
                    close_side.signed(targets.target),
                    close_amount,
                ) {
                    deltas.push(OrderDelta::Create(order));
                }
            }
        }

        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExchangeOrderStatus;
    use crate::exchange::utils::nearest_size;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(side: Side, amount: Decimal) -> Position {
        Position::new("BTCUSD", side, amount, None, Some(dec!(6501.76)), Utc::now()).unwrap()
    }

    fn open_order(id: &str, side: Side, order_type: OrderType, amount: Decimal) -> ExchangeOrder {
        ExchangeOrder {
            id: id.to_string(),
            symbol: "BTCUSD".to_string(),
            status: ExchangeOrderStatus::Open,
            price: dec!(6500),
            amount,
            retry: false,
            our_id: None,
            side,
            order_type,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_long_targets() {
        let targets = RiskRewardCalculator::new()
            .calculate_for_position(&position(Side::Long, dec!(1)), dec!(0.5), dec!(0.25))
            .unwrap();

        assert_eq!(nearest_size(targets.stop, dec!(0.01)), dec!(6469.25));
        assert_eq!(nearest_size(targets.target, dec!(0.01)), dec!(6518.01));
    }

    #[test]
    fn test_short_targets_are_mirrored() {
        let targets = RiskRewardCalculator::new()
            .calculate_for_position(&position(Side::Short, dec!(-1)), dec!(0.5), dec!(0.25))
            .unwrap();

        assert_eq!(nearest_size(targets.stop, dec!(0.01)), dec!(6534.27));
        assert_eq!(nearest_size(targets.target, dec!(0.01)), dec!(6485.51));
    }

    #[test]
    fn test_creates_both_orders() {
        let deltas = RiskRewardCalculator::new().sync_ratio_reward_orders(
            &position(Side::Short, dec!(-0.5)),
            dec!(0.5),
            dec!(0.25),
            &[],
        );

        assert_eq!(deltas.len(), 2);
        let OrderDelta::Create(stop) = &deltas[0] else {
            panic!("expected stop create");
        };
        assert_eq!(stop.order_type, OrderType::Stop);
        assert_eq!(stop.side, Side::Long);
        assert_eq!(stop.amount, Some(dec!(0.5)));

        let OrderDelta::Create(target) = &deltas[1] else {
            panic!("expected target create");
        };
        assert_eq!(target.order_type, OrderType::Limit);
        assert!(target.is_reduce_only());
        assert!(target.is_post_only());
    }

    #[test]
    fn test_hysteresis_suppresses_small_drift() {
        let orders = [
            open_order("s", Side::Short, OrderType::Stop, dec!(1.005)),
            open_order("t", Side::Short, OrderType::Limit, dec!(0.5)),
        ];
        let deltas = RiskRewardCalculator::new().sync_ratio_reward_orders(
            &position(Side::Long, dec!(1)),
            dec!(0.5),
            dec!(0.25),
            &orders,
        );

        assert_eq!(
            deltas,
            vec![OrderDelta::Update {
                id: "t".to_string(),
                update: OrderUpdate::amount(dec!(-1)),
            }]
        );
    }
}
