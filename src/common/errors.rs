//! Error types for the ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using our LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Main error type for ledger operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Amount is zero, negative, or finer than the minor currency unit
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown pot name
    #[error("Pot not found: {0}")]
    NotFound(String),

    /// Mutation would drive a pot balance below zero
    #[error("Insufficient funds in pot {pot}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        pot: String,
        balance: Decimal,
        requested: Decimal,
    },

    /// Pot percentages rejected (unknown pot, out of range, or not summing to 100)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Transfer source and destination are the same pot
    #[error("Transfer source and destination are the same pot: {0}")]
    SamePot(String),

    /// Withdrawal idempotency key reused for a different request
    #[error("Idempotency key {key} already used for a different withdrawal")]
    IdempotencyConflict { key: String },

    /// The backing store could not complete the atomic write
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Audit log replay does not match live balances
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LedgerError {
    /// Only storage failures are safe to retry; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageUnavailable(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::StorageUnavailable(err.to_string())
    }
}
