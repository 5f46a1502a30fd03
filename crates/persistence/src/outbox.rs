//! Transactional outbox records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{DomainEvent, RepositoryError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// A domain event recorded in the outbox, waiting for the relay.
///
/// Messages are written inside the transaction that performs the aggregate
/// change they describe, so they become visible exactly when it commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique, time-ordered identifier for this message.
    pub event_id: Uuid,

    /// The type of the event (e.g., "OrderCreated").
    pub event_type: String,

    /// The type of aggregate (e.g., "Order").
    pub aggregate_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: Uuid,

    /// The full event as JSON.
    pub payload: serde_json::Value,

    /// When the event was recorded.
    pub occurred_at: DateTime<Utc>,

    /// When the relay delivered the event, if it has.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Encodes a domain event into an outbox message.
    pub fn from_event<E: DomainEvent>(event_id: Uuid, event: &E) -> serde_json::Result<Self> {
        Ok(Self {
            event_id,
            event_type: event.event_type().to_string(),
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id(),
            payload: serde_json::to_value(event)?,
            occurred_at: Utc::now(),
            published_at: None,
        })
    }

    /// Decodes the payload back into a domain event.
    pub fn decode<E: DeserializeOwned>(&self) -> serde_json::Result<E> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Read side of the outbox, used by the relay that delivers events.
///
/// Only messages of committed transactions are ever returned.
#[async_trait]
pub trait OutboxReader: Send + Sync {
    /// Returns up to `limit` unpublished messages in ID order.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxMessage>, RepositoryError>;

    /// Marks messages as delivered.
    async fn mark_published(&self, event_ids: &[Uuid]) -> Result<(), RepositoryError>;
}
