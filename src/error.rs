use thiserror::Error;

use crate::domain::Side;

/// Main error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum PairSyncError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Desired state errors
    #[error("Invalid pair state: {0}")]
    InvalidState(String),

    // Order construction errors
    #[error("Invalid order: {0}")]
    Order(#[from] OrderError),

    // Venue errors
    #[error("Exchange error ({exchange}): {reason}")]
    Exchange { exchange: String, reason: String },

    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PairSyncError {
    pub fn exchange(exchange: impl Into<String>, reason: impl Into<String>) -> Self {
        PairSyncError::Exchange {
            exchange: exchange.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for PairSyncError
pub type Result<T> = std::result::Result<T, PairSyncError>;

/// Order construction failures, raised before any I/O
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    #[error("invalid side: {0}")]
    InvalidSide(String),

    #[error("{field} sign does not match side {side}")]
    SignMismatch { side: Side, field: &'static str },

    #[error("order needs an amount or a price")]
    MissingAmountAndPrice,

    #[error("order amount must not be zero")]
    ZeroAmount,
}
