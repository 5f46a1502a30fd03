//! Event dispatch port.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::DomainEvent;

/// Errors raised while handing an event to a dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The event could not be encoded.
    #[error("Failed to serialize event {event_type}: {source}")]
    Serialization {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The event could not be recorded by the backing store.
    #[error("Failed to record event {event_type}: {source}")]
    Record {
        event_type: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Hands domain events off for delivery.
///
/// Implementations are bound to the unit of work that performs the aggregate
/// write the event reports on: a dispatched event becomes durable together
/// with that write, or not at all.
#[async_trait]
pub trait EventDispatcher<E: DomainEvent>: Send + Sync {
    /// Records a single event.
    async fn dispatch(&self, event: E) -> Result<(), DispatchError>;
}
