//! Ledger error taxonomy.
//!
//! Three kinds, all rejected before any mutation is observed:
//! - `Validation`: malformed or out-of-range parameter
//! - `StateConflict`: the request contradicts current state (name taken,
//!   gateway already joined, vault not found, ...)
//! - `InsufficientBalance`: the payer cannot cover the amount
//!
//! Anything else (negative balance, supply drift) is a programmer error and
//! is asserted in tests, not represented here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    StateConflict(String),
    #[error("{0}")]
    InsufficientBalance(String),
}

impl LedgerError {
    /// Stable kind string carried in the response error payload.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "ValidationError",
            LedgerError::StateConflict(_) => "StateConflictError",
            LedgerError::InsufficientBalance(_) => "InsufficientBalanceError",
        }
    }
}

/// Reject with a `Validation` error.
macro_rules! bail_validation {
    ($($arg:tt)*) => {
        return Err($crate::error::LedgerError::Validation(format!($($arg)*)))
    };
}

/// Reject with a `StateConflict` error.
macro_rules! bail_conflict {
    ($($arg:tt)*) => {
        return Err($crate::error::LedgerError::StateConflict(format!($($arg)*)))
    };
}

/// Reject with an `InsufficientBalance` error.
macro_rules! bail_insufficient {
    ($($arg:tt)*) => {
        return Err($crate::error::LedgerError::InsufficientBalance(format!(
            $($arg)*
        )))
    };
}

pub(crate) use {bail_conflict, bail_insufficient, bail_validation};
