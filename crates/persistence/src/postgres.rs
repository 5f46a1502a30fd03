//! PostgreSQL storage backend and advisory locks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CustomerId, ItemId, OrderId, ProductId};
use domain::{
    DispatchError, DomainEvent, EventDispatcher, FindSpec, Item, Money, Order, OrderEvent,
    OrderRepository, OrderStatus, RepositoryError,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{LockError, UnitOfWorkError};
use crate::id::IdGenerator;
use crate::lock::Locker;
use crate::outbox::{OutboxMessage, OutboxReader};
use crate::unit_of_work::{RepositoryProvider, SharedTransaction, TransactionalStore, active};

type PgTransaction = Transaction<'static, Postgres>;

/// PostgreSQL-backed order storage.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
    ids: Arc<IdGenerator>,
}

impl PgDatabase {
    /// Creates a new PostgreSQL database handle.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ids: Arc::new(IdGenerator::new()),
        }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage, sqlx::Error> {
        Ok(OutboxMessage {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

#[async_trait]
impl TransactionalStore for PgDatabase {
    type Transaction = PgTransaction;
    type Provider = PgProvider;

    const BACKEND: &'static str = "postgres";

    async fn begin(&self) -> Result<PgTransaction, UnitOfWorkError> {
        self.pool.begin().await.map_err(UnitOfWorkError::Begin)
    }

    fn provider(&self, tx: SharedTransaction<PgTransaction>) -> PgProvider {
        PgProvider {
            ids: self.ids.clone(),
            tx,
        }
    }

    async fn commit(&self, tx: PgTransaction) -> Result<(), UnitOfWorkError> {
        tx.commit().await.map_err(UnitOfWorkError::Commit)
    }

    async fn rollback(&self, tx: PgTransaction) -> Result<(), UnitOfWorkError> {
        tx.rollback().await.map_err(UnitOfWorkError::Rollback)
    }
}

#[async_trait]
impl OutboxReader for PgDatabase {
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_type, aggregate_id, payload, occurred_at, published_at
            FROM outbox_messages
            WHERE published_at IS NULL
            ORDER BY event_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::persistence)?;

        rows.into_iter()
            .map(Self::row_to_message)
            .collect::<Result<_, _>>()
            .map_err(RepositoryError::persistence)
    }

    async fn mark_published(&self, event_ids: &[Uuid]) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET published_at = NOW()
            WHERE event_id = ANY($1) AND published_at IS NULL
            "#,
        )
        .bind(event_ids)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::persistence)?;

        Ok(())
    }
}

/// Repository provider bound to one PostgreSQL transaction.
#[derive(Clone)]
pub struct PgProvider {
    ids: Arc<IdGenerator>,
    tx: SharedTransaction<PgTransaction>,
}

impl RepositoryProvider for PgProvider {
    type Orders = PgOrderRepository;
    type Events = PgOutboxDispatcher;

    fn order_repository(&self) -> PgOrderRepository {
        PgOrderRepository {
            ids: self.ids.clone(),
            tx: self.tx.clone(),
        }
    }

    fn event_dispatcher(&self) -> PgOutboxDispatcher {
        PgOutboxDispatcher {
            ids: self.ids.clone(),
            tx: self.tx.clone(),
        }
    }
}

/// Order repository running its statements on a shared transaction.
pub struct PgOrderRepository {
    ids: Arc<IdGenerator>,
    tx: SharedTransaction<PgTransaction>,
}

impl PgOrderRepository {
    fn row_to_order(row: &PgRow, items: Vec<Item>) -> Result<Order, RepositoryError> {
        let code: i16 = row.try_get("status").map_err(RepositoryError::persistence)?;
        let status = OrderStatus::from_code(code).ok_or_else(|| {
            RepositoryError::Persistence(format!("unknown order status code {code}").into())
        })?;

        let get = |column: &str| row.try_get::<Uuid, _>(column);
        Ok(Order::from_parts(
            OrderId::from_uuid(get("order_id").map_err(RepositoryError::persistence)?),
            CustomerId::from_uuid(get("customer_id").map_err(RepositoryError::persistence)?),
            status,
            items,
            row.try_get("created_at").map_err(RepositoryError::persistence)?,
            row.try_get("updated_at").map_err(RepositoryError::persistence)?,
            row.try_get("deleted_at").map_err(RepositoryError::persistence)?,
        ))
    }

    fn row_to_item(row: PgRow) -> Result<Item, sqlx::Error> {
        Ok(Item::new(
            ItemId::from_uuid(row.try_get("item_id")?),
            ProductId::from_uuid(row.try_get("product_id")?),
            Money::from_cents(row.try_get("price_cents")?),
        ))
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn next_id(&self) -> Result<Uuid, RepositoryError> {
        self.ids.next_id()
    }

    async fn store(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, customer_id, status, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at,
                deleted_at = EXCLUDED.deleted_at
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.customer_id().as_uuid())
        .bind(order.status().code())
        .bind(order.created_at())
        .bind(order.updated_at())
        .bind(order.deleted_at())
        .execute(&mut **tx)
        .await
        .map_err(RepositoryError::persistence)?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order.id().as_uuid())
            .execute(&mut **tx)
            .await
            .map_err(RepositoryError::persistence)?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (item_id, order_id, product_id, price_cents, position)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(order.id().as_uuid())
            .bind(item.product_id.as_uuid())
            .bind(item.price.cents())
            .bind(position as i32)
            .execute(&mut **tx)
            .await
            .map_err(RepositoryError::persistence)?;
        }

        Ok(())
    }

    async fn find(&self, spec: FindSpec) -> Result<Order, RepositoryError> {
        let mut sql = String::from(
            "SELECT order_id, customer_id, status, created_at, updated_at, deleted_at FROM orders WHERE 1=1",
        );
        let mut param_count = 0;

        if spec.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if spec.customer_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND customer_id = ${param_count}"));
        }
        if spec.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if !spec.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        // IDs are time-ordered, so the highest one is the newest order.
        sql.push_str(" ORDER BY order_id DESC LIMIT 1");

        let mut query = sqlx::query(&sql);
        if let Some(order_id) = spec.order_id {
            query = query.bind(order_id.as_uuid());
        }
        if let Some(customer_id) = spec.customer_id {
            query = query.bind(customer_id.as_uuid());
        }
        if let Some(status) = spec.status {
            query = query.bind(status.code());
        }

        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;

        let row = query
            .fetch_optional(&mut **tx)
            .await
            .map_err(RepositoryError::persistence)?
            .ok_or(RepositoryError::NotFound)?;
        let order_id: Uuid = row.try_get("order_id").map_err(RepositoryError::persistence)?;

        let items = sqlx::query(
            r#"
            SELECT item_id, product_id, price_cents
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(RepositoryError::persistence)?
        .into_iter()
        .map(Self::row_to_item)
        .collect::<Result<Vec<_>, _>>()
        .map_err(RepositoryError::persistence)?;

        Self::row_to_order(&row, items)
    }

    async fn delete(&self, order_id: OrderId) -> Result<(), RepositoryError> {
        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot)?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE order_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(order_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(RepositoryError::persistence)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

/// Event dispatcher writing outbox rows on a shared transaction.
pub struct PgOutboxDispatcher {
    ids: Arc<IdGenerator>,
    tx: SharedTransaction<PgTransaction>,
}

#[async_trait]
impl EventDispatcher<OrderEvent> for PgOutboxDispatcher {
    async fn dispatch(&self, event: OrderEvent) -> Result<(), DispatchError> {
        let event_type = event.event_type();
        let record = |source: Box<dyn std::error::Error + Send + Sync>| DispatchError::Record {
            event_type,
            source,
        };

        let event_id = self.ids.next_id().map_err(|e| record(Box::new(e)))?;
        let message = OutboxMessage::from_event(event_id, &event)
            .map_err(|source| DispatchError::Serialization { event_type, source })?;

        let mut slot = self.tx.lock().await;
        let tx = active(&mut *slot).map_err(|e| record(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO outbox_messages (event_id, event_type, aggregate_type, aggregate_id, payload, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.event_id)
        .bind(&message.event_type)
        .bind(&message.aggregate_type)
        .bind(message.aggregate_id)
        .bind(&message.payload)
        .bind(message.occurred_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| record(Box::new(e)))?;

        Ok(())
    }
}

/// Named locks backed by PostgreSQL session-level advisory locks.
///
/// Each held lock pins one connection, because advisory locks belong to the
/// session that took them. The pool given to the locker must not be the one
/// [`PgDatabase`] begins transactions on: a holder keeps its lock session
/// while its transaction needs a second connection, so a shared pool runs
/// dry once the number of holders reaches its size. Waiters borrow a session
/// only for each attempt. Lock names are hashed to the 64-bit key space with
/// `hashtextextended`.
#[derive(Clone)]
pub struct PgAdvisoryLocker {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgAdvisoryLocker {
    /// Default delay between attempts on a contended lock.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Creates a locker drawing sessions from `pool`, which should be
    /// reserved for lock sessions.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the delay between attempts on a contended lock.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Guard for an advisory lock; owns the session that holds it.
///
/// Dropped without [`Locker::release`], the guard closes its connection
/// instead of returning it to the pool, which makes the server drop the lock.
pub struct PgLockGuard {
    name: String,
    conn: Option<PoolConnection<Postgres>>,
}

impl PgLockGuard {
    /// Returns the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn session(&mut self) -> Result<&mut PoolConnection<Postgres>, LockError> {
        self.conn.as_mut().ok_or_else(|| LockError::NotHeld {
            name: self.name.clone(),
        })
    }
}

impl Drop for PgLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(lock = %self.name, "closing lock session");
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl Locker for PgAdvisoryLocker {
    type Guard = PgLockGuard;

    #[tracing::instrument(skip(self))]
    async fn acquire(&self, name: &str) -> Result<PgLockGuard, LockError> {
        let backend = |source: sqlx::Error| LockError::Backend {
            name: name.to_string(),
            source,
        };

        loop {
            let conn = match self.pool.acquire().await {
                Ok(conn) => conn,
                // Every lock session is busy; keep waiting like a contended lock.
                Err(sqlx::Error::PoolTimedOut) => {
                    tracing::debug!(lock = %name, "lock pool exhausted, retrying");
                    continue;
                }
                Err(source) => return Err(backend(source)),
            };

            // Wrapped before the query so that a cancelled attempt closes the
            // session instead of returning a possibly locked one to the pool.
            let mut guard = PgLockGuard {
                name: name.to_string(),
                conn: Some(conn),
            };
            let locked: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                    .bind(name)
                    .fetch_one(&mut **guard.session()?)
                    .await
                    .map_err(backend)?;
            if locked {
                return Ok(guard);
            }

            // Nothing held: the session goes back to the pool between attempts.
            drop(guard.conn.take());
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn release(&self, mut guard: PgLockGuard) -> Result<(), LockError> {
        let name = guard.name.clone();
        let unlocked: bool =
            sqlx::query_scalar("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&name)
                .fetch_one(&mut **guard.session()?)
                .await
                .map_err(|source| LockError::Backend {
                    name: name.clone(),
                    source,
                })?;

        if !unlocked {
            return Err(LockError::NotHeld { name });
        }

        // Back to the pool only once the session is known to hold nothing.
        drop(guard.conn.take());
        Ok(())
    }
}
