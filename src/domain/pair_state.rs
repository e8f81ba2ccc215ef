use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ExchangeOrder, Order, Side};
use crate::error::PairSyncError;

/// Desired state of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairStateKind {
    /// Open (or keep) a long position
    Long,
    /// Open (or keep) a short position
    Short,
    /// Flatten the position
    Close,
    /// Cancel every open order and forget the pair
    Cancel,
}

impl PairStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairStateKind::Long => "long",
            PairStateKind::Short => "short",
            PairStateKind::Close => "close",
            PairStateKind::Cancel => "cancel",
        }
    }

    /// Position side this state wants to open
    pub fn side(&self) -> Option<Side> {
        match self {
            PairStateKind::Long => Some(Side::Long),
            PairStateKind::Short => Some(Side::Short),
            PairStateKind::Close | PairStateKind::Cancel => None,
        }
    }
}

impl fmt::Display for PairStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PairStateKind {
    type Err = PairSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(PairStateKind::Long),
            "short" => Ok(PairStateKind::Short),
            "close" => Ok(PairStateKind::Close),
            "cancel" => Ok(PairStateKind::Cancel),
            _ => Err(PairSyncError::InvalidState(s.to_string())),
        }
    }
}

/// Options attached to a desired state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairStateOptions {
    /// Use market orders instead of post-only limit orders
    #[serde(default)]
    pub market: bool,
}

/// (exchange, symbol) key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub exchange: String,
    pub symbol: String,
}

impl PairKey {
    pub fn new(exchange: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

/// Desired state record, one per pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairState {
    /// Fresh on every `update`; guards write-backs from in-flight ticks
    pub id: String,
    pub exchange: String,
    pub symbol: String,
    pub state: PairStateKind,
    pub options: PairStateOptions,
    /// Creation time, drives the timeout
    pub time: DateTime<Utc>,
    /// Last submitted desired order
    pub order: Option<Order>,
    /// Last known tracked venue order; re-validated every tick
    pub exchange_order: Option<ExchangeOrder>,
    pub retries: u32,
}

impl PairState {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        state: PairStateKind,
        options: PairStateOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            exchange: exchange.into(),
            symbol: symbol.into(),
            state,
            options,
            time: Utc::now(),
            order: None,
            exchange_order: None,
            retries: 0,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.exchange, &self.symbol)
    }

    /// Minutes since the desired state was declared
    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.time).num_minutes()
    }
}
