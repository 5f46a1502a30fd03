//! Domain layer for the order service.
//!
//! This crate provides:
//! - The `Order` aggregate with its `Item`s and `OrderStatus` state machine
//! - The `OrderRepository` storage contract
//! - The `EventDispatcher` port used to hand off domain events
//! - The domain `OrderService` that mutates one aggregate per call

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod order;

pub use common::{CustomerId, ItemId, OrderId, ProductId};
pub use dispatcher::{DispatchError, EventDispatcher};
pub use error::DomainError;
pub use event::DomainEvent;
pub use order::{
    FindSpec, Item, Money, Order, OrderError, OrderEvent, OrderRepository, OrderService,
    OrderStatus, RepositoryError,
};
