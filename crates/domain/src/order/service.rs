//! Domain order service: business operations over a single aggregate.

use chrono::Utc;
use common::{CustomerId, ItemId, OrderId, ProductId};

use crate::dispatcher::EventDispatcher;
use crate::error::DomainError;

use super::{
    FindSpec, Item, Money, Order, OrderError, OrderEvent, OrderRepository, OrderStatus,
    RepositoryError,
};

/// Service for mutating orders.
///
/// Every successful call performs exactly one repository write followed by
/// one event dispatch. Both collaborators are expected to be bound to the
/// same unit of work, so a failed dispatch rolls the write back with it.
/// Nothing is retried here.
pub struct OrderService<R, D> {
    repo: R,
    dispatcher: D,
}

impl<R, D> OrderService<R, D>
where
    R: OrderRepository,
    D: EventDispatcher<OrderEvent>,
{
    /// Creates a new order service over a repository and a dispatcher.
    pub fn new(repo: R, dispatcher: D) -> Self {
        Self { repo, dispatcher }
    }

    /// Creates an open, empty order for a customer.
    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, customer_id: CustomerId) -> Result<OrderId, DomainError> {
        let order_id = OrderId::from_uuid(self.repo.next_id().await?);

        let order = Order::open(order_id, customer_id, Utc::now());
        self.repo.store(&order).await?;

        self.dispatcher
            .dispatch(OrderEvent::OrderCreated {
                order_id,
                customer_id,
            })
            .await?;

        tracing::debug!(%order_id, "order created");
        Ok(order_id)
    }

    /// Appends an item with a price snapshot to an open order.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        order_id: OrderId,
        product_id: ProductId,
        price: Money,
    ) -> Result<ItemId, DomainError> {
        let mut order = self.load(order_id).await?;
        if !order.status().can_modify_items() {
            return Err(OrderError::InvalidStatus {
                status: order.status(),
                action: "add items",
            }
            .into());
        }

        let item_id = ItemId::from_uuid(self.repo.next_id().await?);
        order.add_item(Item::new(item_id, product_id, price), Utc::now())?;
        self.repo.store(&order).await?;

        self.dispatcher
            .dispatch(OrderEvent::OrderItemChanged {
                order_id,
                added_items: vec![item_id],
                removed_items: vec![],
            })
            .await?;

        tracing::debug!(%order_id, %item_id, "item added");
        Ok(item_id)
    }

    /// Removes an item from an open order.
    #[tracing::instrument(skip(self))]
    pub async fn delete_item(&self, order_id: OrderId, item_id: ItemId) -> Result<(), DomainError> {
        let mut order = self.load(order_id).await?;
        order.remove_item(item_id, Utc::now())?;
        self.repo.store(&order).await?;

        self.dispatcher
            .dispatch(OrderEvent::OrderItemChanged {
                order_id,
                added_items: vec![],
                removed_items: vec![item_id],
            })
            .await?;

        Ok(())
    }

    /// Moves an order to another status.
    #[tracing::instrument(skip(self))]
    pub async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<(), DomainError> {
        let mut order = self.load(order_id).await?;
        let from = order.transition_to(status, Utc::now())?;
        self.repo.store(&order).await?;

        self.dispatcher
            .dispatch(OrderEvent::OrderStatusChanged {
                order_id,
                from,
                to: status,
            })
            .await?;

        Ok(())
    }

    /// Soft-deletes an order.
    #[tracing::instrument(skip(self))]
    pub async fn delete_order(&self, order_id: OrderId) -> Result<(), DomainError> {
        self.repo.delete(order_id).await.map_err(|e| match e {
            RepositoryError::NotFound => DomainError::from(OrderError::NotFound(order_id)),
            e => e.into(),
        })?;

        self.dispatcher
            .dispatch(OrderEvent::OrderDeleted { order_id })
            .await?;

        Ok(())
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, DomainError> {
        self.repo
            .find(FindSpec::by_id(order_id))
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound => OrderError::NotFound(order_id).into(),
                e => e.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::dispatcher::DispatchError;
    use crate::event::DomainEvent;

    #[derive(Clone, Default)]
    struct MockOrderRepository {
        orders: Arc<Mutex<HashMap<OrderId, Order>>>,
        stores: Arc<Mutex<usize>>,
    }

    impl MockOrderRepository {
        async fn get(&self, order_id: OrderId) -> Option<Order> {
            self.orders.lock().await.get(&order_id).cloned()
        }

        async fn store_count(&self) -> usize {
            *self.stores.lock().await
        }
    }

    #[async_trait]
    impl OrderRepository for MockOrderRepository {
        async fn next_id(&self) -> Result<Uuid, RepositoryError> {
            Ok(Uuid::now_v7())
        }

        async fn store(&self, order: &Order) -> Result<(), RepositoryError> {
            *self.stores.lock().await += 1;
            self.orders.lock().await.insert(order.id(), order.clone());
            Ok(())
        }

        async fn find(&self, spec: FindSpec) -> Result<Order, RepositoryError> {
            self.orders
                .lock()
                .await
                .values()
                .filter(|order| spec.matches(order))
                .max_by_key(|order| order.id())
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn delete(&self, order_id: OrderId) -> Result<(), RepositoryError> {
            let mut orders = self.orders.lock().await;
            match orders.get_mut(&order_id) {
                Some(order) if order.is_active() => {
                    order.mark_deleted(Utc::now());
                    Ok(())
                }
                _ => Err(RepositoryError::NotFound),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingDispatcher {
        events: Arc<Mutex<Vec<OrderEvent>>>,
        fail: Arc<AtomicBool>,
    }

    impl RecordingDispatcher {
        async fn events(&self) -> Vec<OrderEvent> {
            self.events.lock().await.clone()
        }
    }

    #[async_trait]
    impl EventDispatcher<OrderEvent> for RecordingDispatcher {
        async fn dispatch(&self, event: OrderEvent) -> Result<(), DispatchError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Record {
                    event_type: event.event_type(),
                    source: "outbox unavailable".into(),
                });
            }
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    fn create_service() -> (
        OrderService<MockOrderRepository, RecordingDispatcher>,
        MockOrderRepository,
        RecordingDispatcher,
    ) {
        let repo = MockOrderRepository::default();
        let dispatcher = RecordingDispatcher::default();
        let service = OrderService::new(repo.clone(), dispatcher.clone());
        (service, repo, dispatcher)
    }

    #[tokio::test]
    async fn test_create_order() {
        let (service, repo, dispatcher) = create_service();
        let customer_id = CustomerId::new();

        let order_id = service.create_order(customer_id).await.unwrap();

        let order = repo.get(order_id).await.unwrap();
        assert_eq!(order.customer_id(), customer_id);
        assert_eq!(order.status(), OrderStatus::Open);
        assert!(order.items().is_empty());
        assert_eq!(
            dispatcher.events().await,
            vec![OrderEvent::OrderCreated {
                order_id,
                customer_id
            }]
        );
    }

    #[tokio::test]
    async fn test_add_item() {
        let (service, repo, dispatcher) = create_service();
        let order_id = service.create_order(CustomerId::new()).await.unwrap();
        let product_id = ProductId::new();

        let item_id = service
            .add_item(order_id, product_id, Money::from_cents(999))
            .await
            .unwrap();

        let order = repo.get(order_id).await.unwrap();
        assert_eq!(
            order.items(),
            &[Item::new(item_id, product_id, Money::from_cents(999))]
        );
        assert_eq!(
            dispatcher.events().await.last(),
            Some(&OrderEvent::OrderItemChanged {
                order_id,
                added_items: vec![item_id],
                removed_items: vec![],
            })
        );
    }

    #[tokio::test]
    async fn test_add_item_to_missing_order() {
        let (service, _, dispatcher) = create_service();

        let result = service
            .add_item(OrderId::new(), ProductId::new(), Money::from_cents(100))
            .await;

        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert!(dispatcher.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_item_requires_open_status() {
        let (service, repo, dispatcher) = create_service();
        let order_id = service.create_order(CustomerId::new()).await.unwrap();
        service
            .set_status(order_id, OrderStatus::Pending)
            .await
            .unwrap();
        let stores_before = repo.store_count().await;
        let events_before = dispatcher.events().await.len();

        let result = service
            .add_item(order_id, ProductId::new(), Money::from_cents(100))
            .await;

        assert!(matches!(
            result,
            Err(DomainError::Order(OrderError::InvalidStatus {
                status: OrderStatus::Pending,
                ..
            }))
        ));
        assert!(repo.get(order_id).await.unwrap().items().is_empty());
        assert_eq!(repo.store_count().await, stores_before);
        assert_eq!(dispatcher.events().await.len(), events_before);
    }

    #[tokio::test]
    async fn test_dispatch_failure_fails_operation() {
        let (service, _, dispatcher) = create_service();
        dispatcher.fail.store(true, Ordering::SeqCst);

        let result = service.create_order(CustomerId::new()).await;

        assert!(matches!(result, Err(DomainError::Dispatch(_))));
    }

    #[tokio::test]
    async fn test_delete_item() {
        let (service, repo, dispatcher) = create_service();
        let order_id = service.create_order(CustomerId::new()).await.unwrap();
        let item_id = service
            .add_item(order_id, ProductId::new(), Money::from_cents(100))
            .await
            .unwrap();

        service.delete_item(order_id, item_id).await.unwrap();

        assert!(repo.get(order_id).await.unwrap().items().is_empty());
        assert_eq!(
            dispatcher.events().await.last(),
            Some(&OrderEvent::OrderItemChanged {
                order_id,
                added_items: vec![],
                removed_items: vec![item_id],
            })
        );
    }

    #[tokio::test]
    async fn test_set_status_follows_state_machine() {
        let (service, repo, dispatcher) = create_service();
        let order_id = service.create_order(CustomerId::new()).await.unwrap();

        let result = service.set_status(order_id, OrderStatus::Paid).await;
        assert!(result.unwrap_err().is_invalid_status());

        service
            .set_status(order_id, OrderStatus::Pending)
            .await
            .unwrap();
        service.set_status(order_id, OrderStatus::Paid).await.unwrap();

        assert_eq!(repo.get(order_id).await.unwrap().status(), OrderStatus::Paid);
        assert_eq!(
            dispatcher.events().await.last(),
            Some(&OrderEvent::OrderStatusChanged {
                order_id,
                from: OrderStatus::Pending,
                to: OrderStatus::Paid,
            })
        );
    }

    #[tokio::test]
    async fn test_delete_order() {
        let (service, repo, dispatcher) = create_service();
        let order_id = service.create_order(CustomerId::new()).await.unwrap();

        service.delete_order(order_id).await.unwrap();

        assert!(!repo.get(order_id).await.unwrap().is_active());
        assert_eq!(
            dispatcher.events().await.last(),
            Some(&OrderEvent::OrderDeleted { order_id })
        );

        let again = service.delete_order(order_id).await;
        assert!(again.unwrap_err().is_not_found());
    }
}
