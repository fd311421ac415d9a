//! Event bus abstraction: durable publish/subscribe transport.
//!
//! Events flow from the producer's outbox through the bus to every consumer
//! group. Delivery is at-least-once: a subscriber may see the same event more
//! than once and must apply it idempotently. Ordering is only guaranteed
//! within one partition, and events are partitioned by aggregate id, so
//! per-auction order holds while unrelated auctions interleave freely.
//!
//! # Implementations
//!
//! - `RedpandaEventBus` (gavel-redpanda) — production, Kafka-compatible
//! - `InMemoryEventBus` (gavel-testing) — fast, deterministic tests

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to topics.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to decode a delivered message.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Generic error for other failures.
    #[error("Event bus error: {0}")]
    Other(String),
}

/// Stream of events from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// bus can be held as `Arc<dyn EventBus>` by the consumer runtime and the
/// outbox dispatcher.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// The event's `key` (aggregate id) is the partition key: same-auction
    /// events land on the same partition and keep their order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish fails; the
    /// caller (outbox dispatcher) retries rather than dropping the event.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics with at-least-once delivery.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
