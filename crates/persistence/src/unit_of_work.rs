//! Unit-of-work abstractions and their generic implementations.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{EventDispatcher, OrderEvent, OrderRepository, RepositoryError};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{LockError, UnitOfWorkError};
use crate::lock::Locker;

/// Factory for repositories bound to one transaction.
///
/// Handles are cheap to clone. Every repository or dispatcher obtained from
/// a provider fails with [`RepositoryError::TransactionClosed`] once the
/// unit of work that produced it has finished.
pub trait RepositoryProvider: Send + Sync + 'static {
    type Orders: OrderRepository;
    type Events: EventDispatcher<OrderEvent>;

    /// Returns an order repository bound to the transaction.
    fn order_repository(&self) -> Self::Orders;

    /// Returns an outbox-backed event dispatcher bound to the transaction.
    fn event_dispatcher(&self) -> Self::Events;
}

/// Runs a sequence of repository operations in one atomic transaction.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Provider: RepositoryProvider;

    /// Opens a transaction, runs `f` with a provider bound to it, commits if
    /// `f` succeeds and rolls back otherwise.
    ///
    /// `f`'s error is returned unchanged. Dropping the returned future rolls
    /// the transaction back.
    async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Provider) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<UnitOfWorkError> + Send;
}

/// A [`UnitOfWork`] that first takes an exclusive named lock.
#[async_trait]
pub trait LockableUnitOfWork: Send + Sync {
    type Provider: RepositoryProvider;

    /// Acquires `lock_name`, then behaves like [`UnitOfWork::execute`].
    ///
    /// The lock is released after the transaction concludes, whatever the
    /// outcome. If the lock cannot be acquired no transaction is started and
    /// [`UnitOfWorkError::Lock`] is returned.
    async fn execute<F, Fut, T, E>(&self, lock_name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Provider) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<UnitOfWorkError> + Send;
}

/// A transaction shared between the unit of work and the repositories it
/// hands out.
///
/// The unit of work detaches the transaction when the wrapped work returns;
/// from then on every handle sees an empty slot.
pub struct SharedTransaction<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for SharedTransaction<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send> SharedTransaction<T> {
    pub(crate) fn new(tx: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Locks the slot for the duration of one repository operation.
    pub async fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().await
    }

    /// Returns true while the owning unit of work is still running.
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub(crate) async fn detach(&self) -> Option<T> {
        self.slot.lock().await.take()
    }
}

/// Borrows the transaction out of a locked slot.
pub(crate) fn active<T>(slot: &mut Option<T>) -> Result<&mut T, RepositoryError> {
    slot.as_mut().ok_or(RepositoryError::TransactionClosed)
}

/// A storage backend able to run transactions.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    type Transaction: Send + 'static;
    type Provider: RepositoryProvider;

    /// Short name of the storage backend, reported by health checks.
    const BACKEND: &'static str;

    /// Opens a new transaction.
    async fn begin(&self) -> Result<Self::Transaction, UnitOfWorkError>;

    /// Builds a repository provider bound to `tx`.
    fn provider(&self, tx: SharedTransaction<Self::Transaction>) -> Self::Provider;

    /// Makes the transaction's writes durable and visible.
    async fn commit(&self, tx: Self::Transaction) -> Result<(), UnitOfWorkError>;

    /// Discards the transaction's writes.
    async fn rollback(&self, tx: Self::Transaction) -> Result<(), UnitOfWorkError>;
}

/// [`UnitOfWork`] over any [`TransactionalStore`].
#[derive(Clone)]
pub struct DatabaseUnitOfWork<S> {
    store: S,
}

impl<S: TransactionalStore> DatabaseUnitOfWork<S> {
    /// Creates a unit of work over a store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: TransactionalStore> UnitOfWork for DatabaseUnitOfWork<S> {
    type Provider = S::Provider;

    async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Provider) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<UnitOfWorkError> + Send,
    {
        let tx = SharedTransaction::new(self.store.begin().await?);
        let result = f(self.store.provider(tx.clone())).await;

        let inner = tx.detach().await.ok_or(UnitOfWorkError::TransactionClosed)?;
        match result {
            Ok(value) => {
                self.store.commit(inner).await?;
                metrics::counter!("uow_commits_total").increment(1);
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(inner).await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                metrics::counter!("uow_rollbacks_total").increment(1);
                Err(err)
            }
        }
    }
}

/// [`LockableUnitOfWork`] combining a store with a [`Locker`].
#[derive(Clone)]
pub struct LockingUnitOfWork<S, L> {
    inner: DatabaseUnitOfWork<S>,
    locker: L,
    lock_timeout: Option<Duration>,
}

impl<S, L> LockingUnitOfWork<S, L>
where
    S: TransactionalStore,
    L: Locker,
{
    /// Creates a locking unit of work that waits indefinitely for locks.
    pub fn new(store: S, locker: L) -> Self {
        Self {
            inner: DatabaseUnitOfWork::new(store),
            locker,
            lock_timeout: None,
        }
    }

    /// Fails lock acquisition with [`LockError::Timeout`] after `timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Returns a reference to the underlying locker.
    pub fn locker(&self) -> &L {
        &self.locker
    }

    async fn acquire(&self, name: &str) -> Result<L::Guard, LockError> {
        match self.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.locker.acquire(name))
                .await
                .map_err(|_| LockError::Timeout {
                    name: name.to_string(),
                    timeout,
                })?,
            None => self.locker.acquire(name).await,
        }
    }
}

#[async_trait]
impl<S, L> LockableUnitOfWork for LockingUnitOfWork<S, L>
where
    S: TransactionalStore,
    L: Locker,
{
    type Provider = S::Provider;

    #[tracing::instrument(skip(self, f))]
    async fn execute<F, Fut, T, E>(&self, lock_name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(Self::Provider) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<UnitOfWorkError> + Send,
    {
        let started = Instant::now();
        let guard = self.acquire(lock_name).await.map_err(|e| {
            tracing::warn!(error = %e, "lock acquisition failed");
            UnitOfWorkError::from(e)
        })?;
        metrics::histogram!("lock_wait_seconds").record(started.elapsed().as_secs_f64());
        tracing::debug!("lock acquired");

        let result = UnitOfWork::execute(&self.inner, f).await;

        if let Err(e) = self.locker.release(guard).await {
            tracing::warn!(error = %e, "lock release reported an error");
        }
        tracing::debug!("lock released");
        result
    }
}
