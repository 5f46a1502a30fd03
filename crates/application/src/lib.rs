//! Order use cases.
//!
//! [`OrderService`] is the entry point for transports. It serializes work
//! with two lock namespaces:
//! 1. `customer_<id>` while finding or creating the customer's open order
//! 2. `order_<id>` while mutating that order
//!
//! The price oracle is queried between the two, outside any lock.

pub mod error;
pub mod price;
pub mod service;

pub use error::ApplicationError;
pub use price::{InMemoryPriceOracle, PriceError, PriceOracle};
pub use service::OrderService;
