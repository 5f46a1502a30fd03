use std::time::Duration;

use thiserror::Error;

/// Errors raised while acquiring or releasing a named lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not obtained before the deadline.
    #[error("Timed out after {timeout:?} waiting for lock {name}")]
    Timeout { name: String, timeout: Duration },

    /// The lock backend failed.
    #[error("Lock backend error for {name}: {source}")]
    Backend {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    /// Release was requested for a lock the session did not hold.
    #[error("Lock {name} was not held at release")]
    NotHeld { name: String },
}

/// Errors raised by a unit of work itself, as opposed to the work it wraps.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The named lock could not be acquired; no transaction was started.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The transaction could not be opened.
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// The transaction could not be committed.
    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] sqlx::Error),

    /// The transaction could not be rolled back.
    #[error("Failed to roll back transaction: {0}")]
    Rollback(#[source] sqlx::Error),

    /// The transaction was detached before the unit of work could finish it.
    #[error("Transaction was closed before the unit of work completed")]
    TransactionClosed,
}

impl UnitOfWorkError {
    /// Returns true if retrying the whole use case may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnitOfWorkError::Lock(LockError::Timeout { .. }))
    }
}
