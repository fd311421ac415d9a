//! In-memory event bus for tests.
//!
//! Fans every published event out to all subscribers of the topic through
//! unbounded channels. Delivery order matches publish order per topic, which
//! stands in for the broker's per-partition ordering in tests.

use gavel_core::event::SerializedEvent;
use gavel_core::event_bus::{EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Subscriber = (
    Vec<String>,
    mpsc::UnboundedSender<Result<SerializedEvent, EventBusError>>,
);

/// In-memory [`EventBus`] implementation.
///
/// Clone-cheap; clones share the same subscribers and publish history.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    published: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, with their topics, in publish order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test infrastructure only).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn published(&self) -> Vec<(String, SerializedEvent)> {
        self.published.lock().unwrap().clone()
    }

    /// Number of events published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test infrastructure only).
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            {
                self.published
                    .lock()
                    .unwrap()
                    .push((topic.clone(), event.clone()));

                // Closed subscriber channels are pruned on the way through.
                self.subscribers
                    .lock()
                    .unwrap()
                    .retain(|(topics, tx)| {
                        if topics.iter().any(|t| t == &topic) {
                            tx.send(Ok(event.clone())).is_ok()
                        } else {
                            !tx.is_closed()
                        }
                    });
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            #[allow(clippy::unwrap_used)]
            self.subscribers.lock().unwrap().push((topics, tx));

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event(event_type: &str, key: &str) -> SerializedEvent {
        SerializedEvent::new(event_type.to_string(), key.to_string(), vec![1, 2, 3], None)
    }

    #[tokio::test]
    async fn subscriber_receives_matching_topics_in_order() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["auction-events"]).await.unwrap();

        bus.publish("auction-events", &event("AuctionCreated.v1", "a"))
            .await
            .unwrap();
        bus.publish("other-events", &event("Other.v1", "b"))
            .await
            .unwrap();
        bus.publish("auction-events", &event("AuctionUpdated.v1", "a"))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type, "AuctionCreated.v1");
        assert_eq!(second.event_type, "AuctionUpdated.v1");
        assert_eq!(bus.publish_count(), 3);
    }
}
