//! Order aggregate and related types.

mod aggregate;
mod events;
mod repository;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Item, Order};
pub use events::OrderEvent;
pub use repository::{FindSpec, OrderRepository, RepositoryError};
pub use service::OrderService;
pub use state::OrderStatus;
pub use value_objects::Money;

use common::{ItemId, OrderId};
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No active order with the given ID exists.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order does not hold the given item.
    #[error("Item {item_id} not found in order {order_id}")]
    ItemNotFound { order_id: OrderId, item_id: ItemId },

    /// The order's status does not allow the requested action.
    #[error("Invalid order status: cannot {action} while order is {status}")]
    InvalidStatus {
        status: OrderStatus,
        action: &'static str,
    },

    /// The requested status change is not part of the state machine.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Item prices cannot be negative.
    #[error("Invalid price: {price} (must not be negative)")]
    InvalidPrice { price: Money },
}
