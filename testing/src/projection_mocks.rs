//! In-memory projection store and dead-letter sink for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already failed

use gavel_core::dead_letter::{DeadLetterError, DeadLetterSink};
use gavel_core::event::SerializedEvent;
use gavel_core::projection::{ProjectionStore, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// In-memory projection store backed by a `HashMap`.
///
/// # Example
///
/// ```
/// use gavel_testing::InMemoryProjectionStore;
/// use gavel_core::projection::ProjectionStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryProjectionStore::new();
/// store.save("auction:123", b"record").await?;
/// assert!(store.exists("auction:123").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryProjectionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all projection data (for test isolation).
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }

    /// All keys currently stored.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().unwrap().keys().cloned().collect()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn save(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            self.data.write().unwrap().insert(key, data);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.data.read().unwrap().get(&key).cloned()) })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.data.write().unwrap().remove(&key);
            Ok(())
        })
    }

    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.data.read().unwrap().contains_key(&key)) })
    }
}

/// A captured dead-lettered event.
#[derive(Clone, Debug)]
pub struct DeadLettered {
    /// The consumer/queue the failure came from.
    pub topic: String,
    /// The failed event, raw payload preserved.
    pub event: SerializedEvent,
    /// Error message from the final failure.
    pub error: String,
    /// Handler invocations made before giving up.
    pub attempts: u32,
}

/// In-memory [`DeadLetterSink`] capturing entries for assertions.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Arc<RwLock<Vec<DeadLettered>>>,
}

impl InMemoryDeadLetterSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured entries, in arrival order.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLettered> {
        self.entries.read().unwrap().clone()
    }

    /// Number of captured entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether nothing has been dead-lettered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(
        &self,
        topic: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), DeadLetterError>> + Send + '_>> {
        let entry = DeadLettered {
            topic: topic.to_string(),
            event: event.clone(),
            error: error.to_string(),
            attempts,
        };
        Box::pin(async move {
            self.entries.write().unwrap().push(entry);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_roundtrip_and_noop_delete() {
        let store = InMemoryProjectionStore::new();
        store.save("auction:1", b"data").await.unwrap();
        assert_eq!(store.get("auction:1").await.unwrap().as_deref(), Some(&b"data"[..]));

        store.delete("auction:1").await.unwrap();
        store.delete("auction:1").await.unwrap(); // second delete is a no-op
        assert!(!store.exists("auction:1").await.unwrap());
    }

    #[tokio::test]
    async fn sink_captures_context() {
        let sink = InMemoryDeadLetterSink::new();
        let event = SerializedEvent::new(
            "AuctionFinished.v1".to_string(),
            "abc".to_string(),
            vec![9],
            None,
        );
        sink.record("search-auction-finished", &event, "aggregate not found", 5)
            .await
            .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 5);
        assert_eq!(entries[0].event.data, vec![9]);
    }
}
