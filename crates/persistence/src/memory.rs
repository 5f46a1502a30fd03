//! In-memory storage backend: transactions stage writes and commit them
//! atomically, with an outbox kept alongside the orders.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{
    DispatchError, DomainEvent, EventDispatcher, FindSpec, Order, OrderEvent, OrderRepository,
    RepositoryError,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::UnitOfWorkError;
use crate::id::IdGenerator;
use crate::outbox::{OutboxMessage, OutboxReader};
use crate::unit_of_work::{RepositoryProvider, SharedTransaction, TransactionalStore, active};

#[derive(Debug, Default)]
struct State {
    orders: BTreeMap<OrderId, Order>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory order storage with transactional semantics, for tests and
/// single-instance use.
///
/// Writes of a transaction are buffered and applied atomically on commit;
/// reads see committed state overlaid with the transaction's own writes.
/// Like a read-committed database, it does not serialize concurrent
/// transactions on its own: that is what named locks are for.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<State>>,
    ids: Arc<IdGenerator>,
    fail_on_dispatch: Arc<AtomicBool>,
}

/// Writes buffered by one in-memory transaction.
#[derive(Debug, Default)]
pub struct InMemoryTransaction {
    orders: BTreeMap<OrderId, Order>,
    outbox: Vec<OutboxMessage>,
}

impl InMemoryDatabase {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures event dispatch to fail, to exercise rollback paths.
    pub fn set_fail_on_dispatch(&self, fail: bool) {
        self.fail_on_dispatch.store(fail, Ordering::SeqCst);
    }

    /// Returns all committed orders, including soft-deleted ones.
    pub async fn orders(&self) -> Vec<Order> {
        self.state.read().await.orders.values().cloned().collect()
    }

    /// Returns a committed order by ID.
    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// Returns all committed outbox messages.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    async fn find_visible(
        &self,
        staged: &InMemoryTransaction,
        spec: FindSpec,
    ) -> Option<Order> {
        let state = self.state.read().await;
        let committed = state
            .orders
            .iter()
            .filter(|(id, _)| !staged.orders.contains_key(id))
            .map(|(_, order)| order);

        committed
            .chain(staged.orders.values())
            .filter(|order| spec.matches(order))
            .max_by_key(|order| order.id())
            .cloned()
    }
}

#[async_trait]
impl TransactionalStore for InMemoryDatabase {
    type Transaction = InMemoryTransaction;
    type Provider = InMemoryProvider;

    const BACKEND: &'static str = "memory";

    async fn begin(&self) -> Result<InMemoryTransaction, UnitOfWorkError> {
        Ok(InMemoryTransaction::default())
    }

    fn provider(&self, tx: SharedTransaction<InMemoryTransaction>) -> InMemoryProvider {
        InMemoryProvider {
            db: self.clone(),
            tx,
        }
    }

    async fn commit(&self, tx: InMemoryTransaction) -> Result<(), UnitOfWorkError> {
        let mut state = self.state.write().await;
        state.orders.extend(tx.orders);
        state.outbox.extend(tx.outbox);
        Ok(())
    }

    async fn rollback(&self, tx: InMemoryTransaction) -> Result<(), UnitOfWorkError> {
        drop(tx);
        Ok(())
    }
}

#[async_trait]
impl OutboxReader for InMemoryDatabase {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, RepositoryError> {
        let state = self.state.read().await;
        let mut messages: Vec<_> = state
            .outbox
            .iter()
            .filter(|m| m.published_at.is_none())
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.event_id);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn mark_published(&self, event_ids: &[Uuid]) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        for message in state
            .outbox
            .iter_mut()
            .filter(|m| event_ids.contains(&m.event_id))
        {
            message.published_at.get_or_insert(now);
        }
        Ok(())
    }
}

/// Repository provider bound to one in-memory transaction.
#[derive(Clone)]
pub struct InMemoryProvider {
    db: InMemoryDatabase,
    tx: SharedTransaction<InMemoryTransaction>,
}

impl RepositoryProvider for InMemoryProvider {
    type Orders = InMemoryOrderRepository;
    type Events = InMemoryOutboxDispatcher;

    fn order_repository(&self) -> InMemoryOrderRepository {
        InMemoryOrderRepository {
            db: self.db.clone(),
            tx: self.tx.clone(),
        }
    }

    fn event_dispatcher(&self) -> InMemoryOutboxDispatcher {
        InMemoryOutboxDispatcher {
            db: self.db.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Order repository over an in-memory transaction.
pub struct InMemoryOrderRepository {
    db: InMemoryDatabase,
    tx: SharedTransaction<InMemoryTransaction>,
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn next_id(&self) -> Result<Uuid, RepositoryError> {
        self.db.ids.next_id()
    }

    async fn store(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;
        tx.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn find(&self, spec: FindSpec) -> Result<Order, RepositoryError> {
        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;
        self.db
            .find_visible(tx, spec)
            .await
            .ok_or(RepositoryError::NotFound)
    }

    async fn delete(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;
        let mut order = self
            .db
            .find_visible(tx, FindSpec::by_id(order_id))
            .await
            .ok_or(RepositoryError::NotFound)?;

        order.mark_deleted(Utc::now());
        tx.orders.insert(order_id, order);
        Ok(())
    }
}

/// Event dispatcher writing to the outbox of an in-memory transaction.
pub struct InMemoryOutboxDispatcher {
    db: InMemoryDatabase,
    tx: SharedTransaction<InMemoryTransaction>,
}

#[async_trait]
impl EventDispatcher<OrderEvent> for InMemoryOutboxDispatcher {
    async fn dispatch(&self, event: OrderEvent) -> Result<(), DispatchError> {
        let event_type = event.event_type();
        if self.db.fail_on_dispatch.load(Ordering::SeqCst) {
            return Err(DispatchError::Record {
                event_type,
                source: "outbox write rejected".into(),
            });
        }

        let event_id = self
            .db
            .ids
            .next_id()
            .map_err(|e| DispatchError::Record {
                event_type,
                source: Box::new(e),
            })?;
        let message = OutboxMessage::from_event(event_id, &event)
            .map_err(|source| DispatchError::Serialization { event_type, source })?;

        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot).map_err(|e| DispatchError::Record {
            event_type,
            source: Box::new(e),
        })?;
        tx.outbox.push(message);
        Ok(())
    }
}
