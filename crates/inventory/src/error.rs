use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a stock mutation was refused.
///
/// These are deterministic outcomes of the current state: retrying the same
/// command against the same state yields the same error.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockError {
    #[error("amount must be positive (got {0})")]
    InvalidAmount(i64),

    /// `available` is the balance the command draws from: unreserved stock for
    /// reservations, reserved stock for allocations.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("nothing reserved to release")]
    NothingReserved,

    #[error("quantity overflow: {current} + {amount}")]
    QuantityOverflow { current: i64, amount: i64 },
}

impl StockError {
    /// Stable reason code recorded in the operation audit trail.
    pub fn reason(&self) -> &'static str {
        match self {
            StockError::InvalidAmount(_) => "invalid_amount",
            StockError::InsufficientStock { .. } => "insufficient_stock",
            StockError::NothingReserved => "nothing_reserved",
            StockError::QuantityOverflow { .. } => "invalid_amount",
        }
    }
}
