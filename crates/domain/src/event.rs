//! Domain event trait.

use serde::Serialize;
use uuid::Uuid;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Only used at serialization boundaries (outbox rows, logs).
    fn event_type(&self) -> &'static str;

    /// Returns the aggregate type name the event belongs to.
    fn aggregate_type(&self) -> &'static str;

    /// Returns the ID of the aggregate the event describes.
    fn aggregate_id(&self) -> Uuid;
}
