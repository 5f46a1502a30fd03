//! Shared types for the order service crates.

mod types;

pub use types::{CustomerId, ItemId, OrderId, ProductId};
