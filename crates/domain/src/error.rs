//! Domain error types.

use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::order::{OrderError, RepositoryError};

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A business rule of the order aggregate was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// The repository failed to generate an ID, load or persist state.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The event produced by the operation could not be recorded.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl DomainError {
    /// Returns true when the requested order or item does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::Order(OrderError::NotFound(_) | OrderError::ItemNotFound { .. })
                | DomainError::Repository(RepositoryError::NotFound)
        )
    }

    /// Returns true when the order's status does not allow the operation.
    pub fn is_invalid_status(&self) -> bool {
        matches!(
            self,
            DomainError::Order(
                OrderError::InvalidStatus { .. } | OrderError::InvalidTransition { .. }
            )
        )
    }
}
