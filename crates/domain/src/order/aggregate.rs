//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{CustomerId, ItemId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use super::{Money, OrderError, OrderStatus};

/// An item held by an order.
///
/// The price is captured when the item is added and never re-read from the
/// catalog afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Unique item identifier.
    pub id: ItemId,

    /// The catalog product this item refers to.
    pub product_id: ProductId,

    /// Price at the time the item was added.
    pub price: Money,
}

impl Item {
    /// Creates a new item.
    pub fn new(id: ItemId, product_id: ProductId, price: Money) -> Self {
        Self {
            id,
            product_id,
            price,
        }
    }
}

/// Order aggregate root.
///
/// Only the domain service mutates an `Order`; repositories rebuild it from
/// storage with [`Order::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    status: OrderStatus,
    items: Vec<Item>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a new open order without items.
    pub fn open(id: OrderId, customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id,
            status: OrderStatus::Open,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Rebuilds an order from persisted state.
    pub fn from_parts(
        id: OrderId,
        customer_id: CustomerId,
        status: OrderStatus,
        items: Vec<Item>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            customer_id,
            status,
            items,
            created_at,
            updated_at,
            deleted_at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Returns true unless the order was soft-deleted.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns the item with the given ID, if any.
    pub fn item(&self, item_id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Returns the sum of all item prices.
    pub fn total(&self) -> Money {
        self.items.iter().map(|item| item.price).sum()
    }

    /// Appends an item. Only allowed while the order is open.
    pub fn add_item(&mut self, item: Item, now: DateTime<Utc>) -> Result<(), OrderError> {
        self.ensure_items_modifiable("add items")?;
        if item.price.is_negative() {
            return Err(OrderError::InvalidPrice { price: item.price });
        }

        self.items.push(item);
        self.updated_at = now;
        Ok(())
    }

    /// Removes an item. Only allowed while the order is open.
    pub fn remove_item(&mut self, item_id: ItemId, now: DateTime<Utc>) -> Result<Item, OrderError> {
        self.ensure_items_modifiable("remove items")?;

        let position = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or(OrderError::ItemNotFound {
                order_id: self.id,
                item_id,
            })?;

        let removed = self.items.remove(position);
        self.updated_at = now;
        Ok(removed)
    }

    /// Moves the order to a new status following the state machine.
    pub fn transition_to(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<OrderStatus, OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    /// Marks the order as soft-deleted.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    fn ensure_items_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        if self.status.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::InvalidStatus {
                status: self.status,
                action,
            })
        }
    }
}
