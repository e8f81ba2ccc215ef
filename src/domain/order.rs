use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrderError;

/// Direction of an order or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Side implied by the sign of a signed amount or price
    pub fn from_signed(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Side::Long)
        } else if value < Decimal::ZERO {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Apply this side's sign to an absolute value
    pub fn signed(&self, value: Decimal) -> Decimal {
        match self {
            Side::Long => value.abs(),
            Side::Short => -value.abs(),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            _ => Err(OrderError::InvalidSide(s.to_string())),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Stop,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Order flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOptions {
    #[serde(default)]
    pub post_only: bool,
    #[serde(default)]
    pub close: bool,
    /// Keep the order at the front of the book via the price adjustment loop
    #[serde(default)]
    pub adjust_price: bool,
    #[serde(default)]
    pub reduce_only: bool,
}

/// Engine originated order (what we want the venue to hold)
///
/// `price` and `amount` are signed: negative values encode the short side.
/// `side` is authoritative; the accessors return absolute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique per submission attempt, regenerated on every retry
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub order_type: OrderType,
    pub options: OrderOptions,
}

fn new_order_id() -> String {
    Uuid::new_v4().to_string()
}

/// Reject values whose sign contradicts the declared side
fn check_sign(side: Side, field: &'static str, value: Option<Decimal>) -> Result<(), OrderError> {
    match value.and_then(Side::from_signed) {
        Some(implied) if implied != side => Err(OrderError::SignMismatch { side, field }),
        _ => Ok(()),
    }
}

impl Order {
    /// Generic constructor; validates side and sign agreement
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        price: Option<Decimal>,
        amount: Option<Decimal>,
        order_type: OrderType,
        options: OrderOptions,
    ) -> Result<Self, OrderError> {
        if price.is_none() && amount.is_none() {
            return Err(OrderError::MissingAmountAndPrice);
        }
        if amount == Some(Decimal::ZERO) {
            return Err(OrderError::ZeroAmount);
        }

        check_sign(side, "price", price)?;
        check_sign(side, "amount", amount)?;

        Ok(Self {
            id: new_order_id(),
            symbol: symbol.into(),
            side,
            price: price.map(|p| side.signed(p)),
            amount: amount.map(|a| side.signed(a)),
            order_type,
            options,
        })
    }

    /// Post-only limit order at an explicit price
    pub fn limit_post_only(
        symbol: impl Into<String>,
        side: Side,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Self, OrderError> {
        Self::new(
            symbol,
            side,
            Some(price),
            Some(amount),
            OrderType::Limit,
            OrderOptions {
                post_only: true,
                ..Default::default()
            },
        )
    }

    /// Post-only limit order whose price is taken from the ticker at submission
    /// time and kept at the front of the book afterwards
    pub fn limit_post_only_auto_adjusted(
        symbol: impl Into<String>,
        amount: Decimal,
    ) -> Result<Self, OrderError> {
        let side = Side::from_signed(amount).ok_or(OrderError::ZeroAmount)?;
        Self::new(
            symbol,
            side,
            None,
            Some(amount),
            OrderType::Limit,
            OrderOptions {
                post_only: true,
                adjust_price: true,
                ..Default::default()
            },
        )
    }

    /// Market order; side follows the amount sign
    pub fn market(symbol: impl Into<String>, amount: Decimal) -> Result<Self, OrderError> {
        let side = Side::from_signed(amount).ok_or(OrderError::ZeroAmount)?;
        Self::new(symbol, side, None, Some(amount), OrderType::Market, OrderOptions::default())
    }

    /// Market order that can only reduce a position
    pub fn market_close(symbol: impl Into<String>, amount: Decimal) -> Result<Self, OrderError> {
        let mut order = Self::market(symbol, amount)?;
        order.options.close = true;
        order.options.reduce_only = true;
        Ok(order)
    }

    /// Reduce-only post-only close order, price kept at the front of the book
    pub fn close_with_price_adjustment(
        symbol: impl Into<String>,
        amount: Decimal,
    ) -> Result<Self, OrderError> {
        let side = Side::from_signed(amount).ok_or(OrderError::ZeroAmount)?;
        Self::new(
            symbol,
            side,
            None,
            Some(amount),
            OrderType::Limit,
            OrderOptions {
                post_only: true,
                close: true,
                adjust_price: true,
                reduce_only: true,
            },
        )
    }

    /// Reduce-only post-only close order at a fixed price (take profit)
    pub fn close_limit_post_only_reduce(
        symbol: impl Into<String>,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Self, OrderError> {
        let side = Side::from_signed(amount).ok_or(OrderError::ZeroAmount)?;
        Self::new(
            symbol,
            side,
            Some(price),
            Some(amount),
            OrderType::Limit,
            OrderOptions {
                post_only: true,
                close: true,
                reduce_only: true,
                ..Default::default()
            },
        )
    }

    /// Protective stop order closing (part of) a position
    pub fn stop_loss(
        symbol: impl Into<String>,
        price: Decimal,
        amount: Decimal,
    ) -> Result<Self, OrderError> {
        let side = Side::from_signed(amount).ok_or(OrderError::ZeroAmount)?;
        Self::new(
            symbol,
            side,
            Some(price),
            Some(amount),
            OrderType::Stop,
            OrderOptions {
                close: true,
                reduce_only: true,
                ..Default::default()
            },
        )
    }

    /// Same order with a fresh id; optionally replace price and amount
    pub fn retry(&self, price: Option<Decimal>, amount: Option<Decimal>) -> Result<Self, OrderError> {
        Self::new(
            self.symbol.clone(),
            self.side,
            price.or(self.price),
            amount.or(self.amount),
            self.order_type,
            self.options,
        )
    }

    /// Copy with the price replaced; keeps the id (used before first submission)
    pub fn with_price(&self, price: Decimal) -> Result<Self, OrderError> {
        check_sign(self.side, "price", Some(price))?;
        Ok(Self {
            price: Some(self.side.signed(price)),
            ..self.clone()
        })
    }

    /// Copy with the amount replaced; keeps the id
    pub fn with_amount(&self, amount: Decimal) -> Result<Self, OrderError> {
        if amount.is_zero() {
            return Err(OrderError::ZeroAmount);
        }
        check_sign(self.side, "amount", Some(amount))?;
        Ok(Self {
            amount: Some(self.side.signed(amount)),
            ..self.clone()
        })
    }

    /// Absolute price
    pub fn price(&self) -> Option<Decimal> {
        self.price.map(|p| p.abs())
    }

    /// Absolute amount
    pub fn amount(&self) -> Option<Decimal> {
        self.amount.map(|a| a.abs())
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    pub fn has_adjusted_price(&self) -> bool {
        self.options.adjust_price
    }

    pub fn is_post_only(&self) -> bool {
        self.options.post_only
    }

    pub fn is_reduce_only(&self) -> bool {
        self.options.reduce_only
    }

    /// True when every signed field agrees with `side`
    pub fn is_consistent(&self) -> bool {
        [self.price, self.amount]
            .into_iter()
            .flatten()
            .filter_map(Side::from_signed)
            .all(|implied| implied == self.side)
    }
}

/// Partial modification of a resting order (`updateOrder(id, {price?, amount?})`)
///
/// Signed like `Order`: a negative price targets the short side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
}

impl OrderUpdate {
    pub fn price(price: Decimal) -> Self {
        Self {
            price: Some(price),
            amount: None,
        }
    }

    pub fn amount(amount: Decimal) -> Self {
        Self {
            price: None,
            amount: Some(amount),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.price.is_none() && self.amount.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_from_str() {
        assert_eq!("LONG".parse::<Side>().unwrap(), Side::Long);
        assert_eq!("sell".parse::<Side>().unwrap(), Side::Short);
        assert!(matches!("up".parse::<Side>(), Err(OrderError::InvalidSide(_))));
    }

    #[test]
    fn test_auto_adjusted_order_takes_side_from_amount() {
        let order = Order::limit_post_only_auto_adjusted("BTCUSD", dec!(-0.5)).unwrap();
        assert_eq!(order.side, Side::Short);
        assert_eq!(order.amount, Some(dec!(-0.5)));
        assert_eq!(order.amount(), Some(dec!(0.5)));
        assert!(order.has_adjusted_price());
        assert!(order.is_post_only());
        assert!(order.price.is_none());
    }

    #[test]
    fn test_sign_mismatch_is_rejected() {
        let err = Order::limit_post_only("BTCUSD", Side::Long, dec!(-100), dec!(1)).unwrap_err();
        assert!(matches!(err, OrderError::SignMismatch { field: "price", .. }));

        let err = Order::limit_post_only("BTCUSD", Side::Short, dec!(-100), dec!(1)).unwrap_err();
        assert!(matches!(err, OrderError::SignMismatch { field: "amount", .. }));
    }

    #[test]
    fn test_missing_amount_and_price() {
        let err = Order::new(
            "BTCUSD",
            Side::Long,
            None,
            None,
            OrderType::Limit,
            OrderOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::MissingAmountAndPrice));
    }

    #[test]
    fn test_retry_regenerates_id() {
        let order = Order::market("ETHUSD", dec!(2)).unwrap();
        let retry = order.retry(None, None).unwrap();
        assert_ne!(order.id, retry.id);
        assert_eq!(order.amount, retry.amount);
        assert_eq!(order.order_type, retry.order_type);
    }

    #[test]
    fn test_with_price_normalises_sign() {
        let order = Order::close_with_price_adjustment("ETHUSD", dec!(-2)).unwrap();
        let priced = order.with_price(dec!(-1500)).unwrap();
        assert_eq!(priced.id, order.id);
        assert_eq!(priced.price, Some(dec!(-1500)));
        assert!(order.with_price(dec!(1500)).is_err());
    }

    fn decimal() -> impl Strategy<Value = Decimal> {
        (-1_000_000i64..1_000_000i64)
            .prop_filter("non zero", |v| *v != 0)
            .prop_map(|v| Decimal::new(v, 4))
    }

    proptest! {
        #[test]
        fn prop_side_and_sign_never_disagree(amount in decimal(), price in decimal()) {
            let side = Side::from_signed(amount).unwrap();
            let constructed = [
                Order::market("X", amount),
                Order::limit_post_only_auto_adjusted("X", amount),
                Order::close_with_price_adjustment("X", amount),
                Order::stop_loss("X", side.signed(price), amount),
                Order::close_limit_post_only_reduce("X", side.signed(price), amount),
                Order::limit_post_only("X", side, side.signed(price), amount),
            ];

            for order in constructed {
                let order = order.unwrap();
                prop_assert_eq!(order.side, side);
                prop_assert!(order.is_consistent());
                prop_assert!(order.retry(None, None).unwrap().is_consistent());
            }
        }

        #[test]
        fn prop_opposite_sign_price_fails(amount in decimal(), price in decimal()) {
            let side = Side::from_signed(amount).unwrap();
            let wrong = side.opposite().signed(price);
            prop_assert!(Order::stop_loss("X", wrong, amount).is_err());
        }
    }
}
