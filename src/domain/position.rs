use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;
use crate::error::{PairSyncError, Result};

/// Open position as reported by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Signed: negative for short, positive for long
    pub amount: Decimal,
    /// Unrealized profit in percent
    pub profit: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
    pub entry: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        amount: Decimal,
        profit: Option<Decimal>,
        entry: Option<Decimal>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let symbol = symbol.into();

        match Side::from_signed(amount) {
            Some(implied) if implied == side => {}
            _ => {
                return Err(PairSyncError::Validation(format!(
                    "position {} amount {} does not match side {}",
                    symbol, amount, side
                )))
            }
        }

        Ok(Self {
            symbol,
            side,
            amount,
            profit,
            updated_at: Utc::now(),
            entry,
            created_at,
        })
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn is_short(&self) -> bool {
        self.side == Side::Short
    }

    /// Copy with a recomputed profit
    pub fn with_profit(&self, profit: Decimal) -> Self {
        Self {
            profit: Some(profit),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}
