//! Application error types.

use domain::{DomainError, OrderError};
use persistence::UnitOfWorkError;
use thiserror::Error;

use crate::price::PriceError;

/// Errors returned by application use cases.
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// A business rule or repository operation failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The unit of work could not lock, begin or commit.
    #[error("Unit of work error: {0}")]
    UnitOfWork(#[from] UnitOfWorkError),

    /// The product price could not be resolved.
    #[error("Price error: {0}")]
    Price(#[from] PriceError),
}

impl ApplicationError {
    /// Returns true when the order, item or product does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ApplicationError::Domain(err) => err.is_not_found(),
            ApplicationError::Price(err) => matches!(err, PriceError::NotFound(_)),
            ApplicationError::UnitOfWork(_) => false,
        }
    }

    /// Returns true if the caller may retry the whole use case.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplicationError::UnitOfWork(err) => err.is_retryable(),
            ApplicationError::Price(err) => matches!(err, PriceError::Unavailable(_)),
            ApplicationError::Domain(_) => false,
        }
    }
}

impl From<OrderError> for ApplicationError {
    fn from(err: OrderError) -> Self {
        ApplicationError::Domain(err.into())
    }
}
