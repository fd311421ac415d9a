//! Projection storage traits: the read side of the auction platform.
//!
//! The search projection is an eventually-consistent mirror of aggregate
//! state, rebuildable from events plus catch-up snapshots. It is the only
//! mutable shared resource in the consistency layer; writes are keyed by
//! aggregate id and applied sequentially per key.
//!
//! Storage is a byte-oriented key/value surface so backends stay swappable:
//! Postgres in production, a `HashMap` in tests.

use std::future::Future;
use std::pin::Pin;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An event referenced an aggregate the projection has never seen.
    /// Recoverable: a concurrently in-flight `Created` may still land.
    #[error("Aggregate not found in projection: {0}")]
    MissingAggregate(String),

    /// Event processing error.
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Backend storage for projection records.
///
/// Dyn-compatible (boxed futures) so appliers hold `Arc<dyn ProjectionStore>`.
/// All operations are upserts/no-op deletes, which keeps the applier's
/// idempotence guarantees independent of the backend.
pub trait ProjectionStore: Send + Sync {
    /// Upsert the value for a key.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failure.
    fn save(
        &self,
        key: &str,
        data: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Fetch the value for a key, if present.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failure.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>>;

    /// Remove a key. Removing an absent key is a no-op, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failure.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Check whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] on backend failure.
    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}
