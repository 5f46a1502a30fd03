//! Transactional consistency layer for the order service.
//!
//! - [`UnitOfWork`] runs a closure inside one database transaction
//! - [`LockableUnitOfWork`] additionally serializes callers on a named lock
//! - [`Locker`] implementations provide the named locks
//! - Backends: [`InMemoryDatabase`] and [`PgDatabase`], each with a
//!   transaction-bound order repository and outbox dispatcher

pub mod error;
pub mod id;
pub mod lock;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod unit_of_work;

pub use error::{LockError, UnitOfWorkError};
pub use id::IdGenerator;
pub use lock::{InMemoryLockGuard, InMemoryLocker, Locker};
pub use memory::{InMemoryDatabase, InMemoryProvider};
pub use outbox::{OutboxMessage, OutboxReader};
pub use postgres::{PgAdvisoryLocker, PgDatabase, PgLockGuard, PgProvider};
pub use unit_of_work::{
    DatabaseUnitOfWork, LockableUnitOfWork, LockingUnitOfWork, RepositoryProvider,
    SharedTransaction, TransactionalStore, UnitOfWork,
};
