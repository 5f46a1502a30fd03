//! Order storage contract.

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use thiserror::Error;
use uuid::Uuid;

use super::{Order, OrderStatus};

/// Errors reported by an [`OrderRepository`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// No order matched the query.
    #[error("Order not found")]
    NotFound,

    /// A new identifier could not be produced.
    #[error("Identifier generation failed: {0}")]
    Generation(String),

    /// The repository outlived the unit of work it was bound to.
    #[error("Transaction is no longer active")]
    TransactionClosed,

    /// The storage backend failed.
    #[error("Persistence error: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RepositoryError {
    /// Wraps a backend error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RepositoryError::Persistence(Box::new(err))
    }
}

/// Filter for [`OrderRepository::find`].
///
/// All provided fields are AND-ed. Soft-deleted orders are excluded unless
/// `include_deleted` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindSpec {
    pub order_id: Option<OrderId>,
    pub customer_id: Option<CustomerId>,
    pub status: Option<OrderStatus>,
    pub include_deleted: bool,
}

impl FindSpec {
    /// Matches a single order by ID.
    pub fn by_id(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Self::default()
        }
    }

    /// Matches the orders of a customer.
    pub fn by_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
            ..Self::default()
        }
    }

    /// Restricts the match to a status.
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Includes soft-deleted orders.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Returns true if the order satisfies every provided field.
    pub fn matches(&self, order: &Order) -> bool {
        if let Some(id) = self.order_id
            && order.id() != id
        {
            return false;
        }
        if let Some(customer_id) = self.customer_id
            && order.customer_id() != customer_id
        {
            return false;
        }
        if let Some(status) = self.status
            && order.status() != status
        {
            return false;
        }
        self.include_deleted || order.is_active()
    }
}

/// Storage contract for order aggregates.
///
/// Instances are bound to one unit of work and must not be used after it
/// completes.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Returns a new, unique, time-ordered identifier for orders and items.
    async fn next_id(&self) -> Result<Uuid, RepositoryError>;

    /// Upserts the order header and replaces its full item set.
    async fn store(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Returns the order matching `spec` together with its items.
    ///
    /// When several orders match, the most recently created one is returned.
    async fn find(&self, spec: FindSpec) -> Result<Order, RepositoryError>;

    /// Soft-deletes an active order.
    async fn delete(&self, order_id: OrderId) -> Result<(), RepositoryError>;
}
