//! Event handler trait and the failure taxonomy.
//!
//! Handlers receive the serialized envelope, deserialize the payload they
//! know, and apply it. Because delivery is at-least-once, handlers must be
//! idempotent: re-handling the same event yields the same projection state.

use gavel_core::event::SerializedEvent;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// How a handler invocation failed, which drives the retry decision.
#[derive(Error, Debug)]
pub enum HandleError {
    /// Infrastructure hiccup (store unreachable, timeout). Retried a bounded
    /// number of times, then dead-lettered.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Malformed or unrecognized payload. Never retried; dead-lettered
    /// immediately with the raw payload preserved.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// The event referenced an aggregate the projection has not seen yet.
    /// Treated as transient so a concurrently in-flight `Created` can land.
    #[error("Aggregate not found: {0}")]
    MissingAggregate(String),
}

impl HandleError {
    /// Whether another attempt could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

/// An idempotent consumer of one event kind.
pub trait EventHandler: Send + Sync {
    /// Handle a delivered event.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] classified so the runtime can retry or
    /// dead-letter; the error never escapes the consumer loop.
    fn handle<'a>(
        &'a self,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>>;
}

/// Dispatch table mapping event type identifiers to handlers.
///
/// Unknown event types are not an error: a consumer built against an older
/// contract simply skips kinds it does not know.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type (e.g. `"AuctionCreated.v1"`).
    #[must_use]
    pub fn with(mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Look up the handler for an event type.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(event_type)
    }

    /// Event types this registry can dispatch.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl EventHandler for NoopHandler {
        fn handle<'a>(
            &'a self,
            _event: &'a SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(HandleError::Transient("db down".to_string()).is_retryable());
        assert!(HandleError::MissingAggregate("x".to_string()).is_retryable());
        assert!(!HandleError::Permanent("bad payload".to_string()).is_retryable());
    }

    #[test]
    fn registry_dispatches_by_event_type() {
        let registry = HandlerRegistry::new().with("AuctionCreated.v1", Arc::new(NoopHandler));
        assert!(registry.get("AuctionCreated.v1").is_some());
        assert!(registry.get("AuctionFinished.v1").is_none());
    }
}
