//! Order domain events.

use common::{CustomerId, ItemId, OrderId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::DomainEvent;

use super::OrderStatus;

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was created.
    OrderCreated {
        order_id: OrderId,
        customer_id: CustomerId,
    },

    /// Items were added to or removed from the order.
    OrderItemChanged {
        order_id: OrderId,
        added_items: Vec<ItemId>,
        removed_items: Vec<ItemId>,
    },

    /// Order moved to a new status.
    OrderStatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Order was soft-deleted.
    OrderDeleted { order_id: OrderId },
}

impl OrderEvent {
    /// Returns the order this event describes.
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::OrderItemChanged { order_id, .. }
            | OrderEvent::OrderStatusChanged { order_id, .. }
            | OrderEvent::OrderDeleted { order_id } => *order_id,
        }
    }
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated",
            OrderEvent::OrderItemChanged { .. } => "OrderItemChanged",
            OrderEvent::OrderStatusChanged { .. } => "OrderStatusChanged",
            OrderEvent::OrderDeleted { .. } => "OrderDeleted",
        }
    }

    fn aggregate_type(&self) -> &'static str {
        "Order"
    }

    fn aggregate_id(&self) -> Uuid {
        self.order_id().as_uuid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        let order_id = OrderId::new();
        let created = OrderEvent::OrderCreated {
            order_id,
            customer_id: CustomerId::new(),
        };
        let changed = OrderEvent::OrderItemChanged {
            order_id,
            added_items: vec![ItemId::new()],
            removed_items: vec![],
        };

        assert_eq!(created.event_type(), "OrderCreated");
        assert_eq!(changed.event_type(), "OrderItemChanged");
        assert_eq!(created.aggregate_id(), order_id.as_uuid());
        assert_eq!(changed.aggregate_type(), "Order");
    }

    #[test]
    fn test_serialized_tag_matches_event_type() {
        let event = OrderEvent::OrderDeleted {
            order_id: OrderId::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["data"]["order_id"], event.order_id().to_string());
    }
}
