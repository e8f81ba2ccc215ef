use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OrderType, Side};

/// Venue reported order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeOrderStatus {
    Open,
    Done,
    Canceled,
    Rejected,
}

impl ExchangeOrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeOrderStatus::Open)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeOrderStatus::Open => "open",
            ExchangeOrderStatus::Done => "done",
            ExchangeOrderStatus::Canceled => "canceled",
            ExchangeOrderStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order as reported by a venue
///
/// Records are replaced wholesale, never mutated field by field. `price` and
/// `amount` are absolute values; `side` carries the direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Venue assigned id
    pub id: String,
    pub symbol: String,
    pub status: ExchangeOrderStatus,
    pub price: Decimal,
    pub amount: Decimal,
    /// Venue hint that a rejection is transient and a resubmission is advisable
    pub retry: bool,
    /// Echo of the engine generated `Order::id`
    pub our_id: Option<String>,
    pub side: Side,
    pub order_type: OrderType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Result of handing an order to a venue
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Venue holds the order (open) or already filled it (done)
    Accepted(ExchangeOrder),
    /// Transient rejection, resubmission with fresh parameters is advisable
    RetryableRejection(ExchangeOrder),
    /// Durable rejection (insufficient balance, invalid symbol, ...)
    PermanentRejection(ExchangeOrder),
}

impl SubmitOutcome {
    pub fn exchange_order(&self) -> &ExchangeOrder {
        match self {
            SubmitOutcome::Accepted(order)
            | SubmitOutcome::RetryableRejection(order)
            | SubmitOutcome::PermanentRejection(order) => order,
        }
    }

    pub fn into_exchange_order(self) -> ExchangeOrder {
        match self {
            SubmitOutcome::Accepted(order)
            | SubmitOutcome::RetryableRejection(order)
            | SubmitOutcome::PermanentRejection(order) => order,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

impl ExchangeOrder {
    pub fn is_open(&self) -> bool {
        self.status == ExchangeOrderStatus::Open
    }

    pub fn is_done(&self) -> bool {
        self.status == ExchangeOrderStatus::Done
    }

    pub fn is_canceled(&self) -> bool {
        self.status == ExchangeOrderStatus::Canceled
    }

    pub fn is_rejected(&self) -> bool {
        self.status == ExchangeOrderStatus::Rejected
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    /// Amount with the side's sign applied
    pub fn signed_amount(&self) -> Decimal {
        self.side.signed(self.amount)
    }

    /// Classify a submission response from `status` and `retry`
    pub fn classify(self) -> SubmitOutcome {
        match self.status {
            ExchangeOrderStatus::Open | ExchangeOrderStatus::Done => SubmitOutcome::Accepted(self),
            ExchangeOrderStatus::Canceled | ExchangeOrderStatus::Rejected if self.retry => {
                SubmitOutcome::RetryableRejection(self)
            }
            ExchangeOrderStatus::Canceled | ExchangeOrderStatus::Rejected => {
                SubmitOutcome::PermanentRejection(self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(status: ExchangeOrderStatus, retry: bool) -> ExchangeOrder {
        ExchangeOrder {
            id: "1".to_string(),
            symbol: "BTCUSD".to_string(),
            status,
            price: dec!(100),
            amount: dec!(1),
            retry,
            our_id: None,
            side: Side::Short,
            order_type: OrderType::Limit,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            order(ExchangeOrderStatus::Open, false).classify(),
            SubmitOutcome::Accepted(_)
        ));
        assert!(matches!(
            order(ExchangeOrderStatus::Done, true).classify(),
            SubmitOutcome::Accepted(_)
        ));
        assert!(matches!(
            order(ExchangeOrderStatus::Canceled, true).classify(),
            SubmitOutcome::RetryableRejection(_)
        ));
        assert!(matches!(
            order(ExchangeOrderStatus::Rejected, false).classify(),
            SubmitOutcome::PermanentRejection(_)
        ));
    }

    #[test]
    fn test_signed_amount_follows_side() {
        assert_eq!(order(ExchangeOrderStatus::Open, false).signed_amount(), dec!(-1));
    }
}
