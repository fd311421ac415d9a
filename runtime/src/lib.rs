//! # Gavel Runtime
//!
//! Consumer runtime for the auction platform's consistency layer: handler
//! dispatch by event kind, bounded fixed-interval retry, dead-letter routing
//! for exhausted or malformed messages, and graceful drain on shutdown.
//!
//! Each event kind gets its own [`EventConsumer`] task over its own durable
//! queue, mirroring the per-endpoint consumers on the producer side; retries
//! on one kind never stall another.

pub mod consumer;
pub mod handler;
pub mod retry;

pub use consumer::{EventConsumer, EventConsumerBuilder};
pub use handler::{EventHandler, HandleError, HandlerRegistry};
pub use retry::{RetryPolicy, retry_fixed, retry_forever};
