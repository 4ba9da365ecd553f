// ================================================================
// File: keyshop-common/src/error.rs
// ================================================================

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No card could be claimed after the bounded retry loop. Recoverable;
    /// surfaced to the buyer as "try again later".
    #[error("stock locked: no reservable card for product {0}")]
    StockLocked(String),

    /// The conditional points decrement affected zero rows. Recoverable.
    #[error("insufficient points for user {0}")]
    InsufficientPoints(String),

    /// Signature was valid but the paid amount disagrees with the order.
    /// Security-relevant hard failure; the order must never be fulfilled.
    #[error("amount mismatch on order {order_id}: order {expected}, paid {paid}")]
    AmountMismatch {
        order_id: String,
        expected: Decimal,
        paid: Decimal,
    },

    /// Webhook signature did not verify. Rejected at the boundary with no
    /// state change.
    #[error("invalid payment signature")]
    SignatureInvalid,

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation is not valid for the row's current state (e.g.
    /// cancelling a non-pending order).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl Error {
    /// True for failures the buyer can simply retry (stock race, points race).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::StockLocked(_) | Error::InsufficientPoints(_))
    }
}
