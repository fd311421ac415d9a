//! Dead-letter sink abstraction.
//!
//! Messages that exhaust their bounded retries, or fail validation
//! permanently, are routed here with the raw payload preserved for manual
//! inspection. The consumer runtime depends on this trait; `gavel-postgres`
//! provides the durable implementation and `gavel-testing` an in-memory one.

use crate::event::SerializedEvent;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error recording a dead-lettered event.
#[derive(Error, Debug)]
pub enum DeadLetterError {
    /// The sink's backing store failed.
    #[error("Dead letter storage error: {0}")]
    Storage(String),
}

/// Destination for messages that could not be processed.
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed event together with its failure context.
    ///
    /// `attempts` is the number of handler invocations made before giving up
    /// (1 for permanent validation failures that are never retried).
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the entry cannot be persisted.
    fn record(
        &self,
        topic: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>>;
}
