//! Auction event contracts and the serialized wire envelope.
//!
//! Producers and consumers share a closed set of event kinds with fixed,
//! versionable field sets. Events are immutable facts about committed
//! mutations of the authoritative auction record; they are serialized with
//! `bincode` on the wire and carry the aggregate id as the partition key so
//! the transport keeps per-auction delivery order.
//!
//! # Contract evolution
//!
//! The `event_type()` identifier carries a version suffix
//! (`"AuctionCreated.v1"`). New fields must be added as `Option` so consumers
//! built against an older contract keep working; a missing optional field on
//! an update means "no change", never a reset to default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for event serialization and contract handling.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during dispatch.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Full attribute snapshot published when an auction is created.
///
/// `version` is a per-aggregate monotonic counter assigned by the producer;
/// projection applies ignore events that are not newer than stored state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionCreated {
    /// Stable aggregate identifier, assigned once and never reused.
    pub id: Uuid,
    /// Per-aggregate monotonic version of this mutation.
    pub version: u64,
    /// Vehicle make.
    pub make: String,
    /// Vehicle model.
    pub model: String,
    /// Vehicle color.
    pub color: String,
    /// Odometer reading.
    pub mileage: i32,
    /// Model year.
    pub year: i32,
    /// Minimum amount the seller will accept.
    pub reserve_price: i64,
    /// Seller username.
    pub seller: String,
    /// When the auction closes.
    pub auction_end: DateTime<Utc>,
    /// When the aggregate was created.
    pub created_at: DateTime<Utc>,
}

/// Partial update: only changed fields are present.
///
/// `None` means the field did not change and the prior value is preserved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionUpdated {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Per-aggregate monotonic version of this mutation.
    pub version: u64,
    /// New make, if changed.
    pub make: Option<String>,
    /// New model, if changed.
    pub model: Option<String>,
    /// New color, if changed.
    pub color: Option<String>,
    /// New mileage, if changed.
    pub mileage: Option<i32>,
    /// New model year, if changed.
    pub year: Option<i32>,
}

/// Deletion notice; carries only the id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionDeleted {
    /// Aggregate identifier.
    pub id: Uuid,
}

/// Published when an auction reaches its end time.
///
/// `winner` and `amount` are only populated when `item_sold` is true;
/// consumers must not dereference them otherwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionFinished {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Per-aggregate monotonic version of this mutation.
    pub version: u64,
    /// Whether a winning bid above zero existed at close.
    pub item_sold: bool,
    /// Winning bidder, when the item sold.
    pub winner: Option<String>,
    /// Winning amount, when the item sold.
    pub amount: Option<i64>,
}

/// Closed set of auction domain events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AuctionEvent {
    /// A new auction was committed to the authoritative store.
    Created(AuctionCreated),
    /// Mutable item fields changed.
    Updated(AuctionUpdated),
    /// The auction was removed.
    Deleted(AuctionDeleted),
    /// The auction reached its end time.
    Finished(AuctionFinished),
}

impl AuctionEvent {
    /// Stable, versioned type identifier used for queue naming and dispatch.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "AuctionCreated.v1",
            Self::Updated(_) => "AuctionUpdated.v1",
            Self::Deleted(_) => "AuctionDeleted.v1",
            Self::Finished(_) => "AuctionFinished.v1",
        }
    }

    /// The aggregate this event belongs to.
    #[must_use]
    pub const fn aggregate_id(&self) -> Uuid {
        match self {
            Self::Created(e) => e.id,
            Self::Updated(e) => e.id,
            Self::Deleted(e) => e.id,
            Self::Finished(e) => e.id,
        }
    }

    /// Serialize to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are corrupt
    /// or encode an incompatible schema.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event ready for transport.
///
/// `key` is the aggregate id rendered as a string; brokers use it as the
/// partition key so events for the same auction stay ordered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., `"AuctionCreated.v1"`).
    pub event_type: String,

    /// Partition key: the aggregate id.
    pub key: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional metadata (correlation id, publish timestamp, ...).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        key: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            key,
            data,
            metadata,
        }
    }

    /// Serialize an [`AuctionEvent`] into its wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn from_event(
        event: &AuctionEvent,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            key: event.aggregate_id().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, key: {}, size: {} bytes }}",
            self.event_type,
            self.key,
            self.data.len()
        )
    }
}

/// Deterministic kebab-case queue name for a consumer service and event kind.
///
/// `queue_name("search", "AuctionCreated.v1")` yields
/// `"search-auction-created"`. Redeploys reattach to the same durable queue
/// instead of creating duplicates.
#[must_use]
pub fn queue_name(service: &str, event_type: &str) -> String {
    let base = event_type.split('.').next().unwrap_or(event_type);
    let mut kebab = String::with_capacity(base.len() + 8);
    for (i, c) in base.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                kebab.push('-');
            }
            kebab.push(c.to_ascii_lowercase());
        } else {
            kebab.push(c);
        }
    }
    format!("{service}-{kebab}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn created(id: Uuid) -> AuctionEvent {
        AuctionEvent::Created(AuctionCreated {
            id,
            version: 1,
            make: "Ford".to_string(),
            model: "GT".to_string(),
            color: "White".to_string(),
            mileage: 50_000,
            year: 2020,
            reserve_price: 20_000,
            seller: "alice".to_string(),
            auction_end: Utc::now(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn event_type_is_versioned() {
        let id = Uuid::new_v4();
        assert_eq!(created(id).event_type(), "AuctionCreated.v1");
        assert_eq!(
            AuctionEvent::Deleted(AuctionDeleted { id }).event_type(),
            "AuctionDeleted.v1"
        );
    }

    #[test]
    fn serialization_roundtrip() {
        let event = created(Uuid::new_v4());
        let bytes = event.to_bytes().unwrap();
        let decoded = AuctionEvent::from_bytes(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn envelope_carries_aggregate_key() {
        let id = Uuid::new_v4();
        let event = created(id);
        let serialized = SerializedEvent::from_event(&event, None).unwrap();
        assert_eq!(serialized.event_type, "AuctionCreated.v1");
        assert_eq!(serialized.key, id.to_string());
        assert!(!serialized.data.is_empty());
    }

    #[test]
    fn updated_defaults_to_no_change() {
        let update = AuctionUpdated {
            id: Uuid::new_v4(),
            version: 2,
            mileage: Some(500),
            ..AuctionUpdated::default()
        };
        assert!(update.make.is_none());
        assert!(update.model.is_none());
        assert_eq!(update.mileage, Some(500));
    }

    #[test]
    fn queue_names_are_kebab_case_and_deterministic() {
        assert_eq!(
            queue_name("search", "AuctionCreated.v1"),
            "search-auction-created"
        );
        assert_eq!(
            queue_name("search", "AuctionFinished.v1"),
            "search-auction-finished"
        );
        assert_eq!(
            queue_name("search", "AuctionCreated.v1"),
            queue_name("search", "AuctionCreated.v1")
        );
    }
}
