//! Store error types

use thiserror::Error;

/// Errors from the embedded store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to open store at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("No transaction is active")]
    NoActiveTransaction,

    #[error("A transaction is already active")]
    TransactionActive,
}
