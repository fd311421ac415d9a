//! # Gavel Testing
//!
//! Fast, deterministic in-memory doubles for the consistency layer:
//!
//! - [`InMemoryEventBus`]: publish/subscribe over tokio channels, preserving
//!   publish order per topic
//! - [`InMemoryProjectionStore`]: `HashMap`-backed projection storage
//! - [`InMemoryDeadLetterSink`]: captures dead-lettered events for assertions
//!
//! These implement the same `gavel-core` traits as the production backends,
//! so consumers, projections, and the outbox dispatcher can be exercised
//! end-to-end without a broker or database.

pub mod event_bus;
pub mod projection_mocks;

pub use event_bus::InMemoryEventBus;
pub use projection_mocks::{DeadLettered, InMemoryDeadLetterSink, InMemoryProjectionStore};
