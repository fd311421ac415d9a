//! # Gavel Core
//!
//! Shared contracts and traits for the auction platform's event-driven
//! consistency layer: the versioned event shapes, the durable publish/
//! subscribe abstraction, projection storage, the dead-letter sink, and
//! startup configuration.
//!
//! The flow this crate describes:
//!
//! ```text
//! committed mutation ──► outbox row ──► broker ──► consumer runtime
//!                                                        │
//!                                                        ▼
//!                                              search projection (idempotent)
//! ```
//!
//! Delivery is at-least-once with per-aggregate ordering; consumers are
//! idempotent and tolerate duplicates and out-of-order kinds.

pub mod config;
pub mod dead_letter;
pub mod event;
pub mod event_bus;
pub mod projection;

pub use chrono::{DateTime, Utc};
pub use config::GavelConfig;
pub use dead_letter::{DeadLetterError, DeadLetterSink};
pub use event::{
    AuctionCreated, AuctionDeleted, AuctionEvent, AuctionFinished, AuctionUpdated, EventError,
    SerializedEvent, queue_name,
};
pub use event_bus::{EventBus, EventBusError, EventStream};
pub use projection::{ProjectionError, ProjectionStore};
