//! Event bus consumer with bounded retry and dead-lettering.
//!
//! `EventConsumer` wraps the subscribe-process-reconnect loop every
//! subscriber needs: it subscribes to its topics, dispatches each delivered
//! message to the handler registered for its event kind, retries failed
//! handlers under a bounded fixed-interval policy, routes exhausted or
//! permanently failed messages to the dead-letter sink, and reconnects if
//! the stream drops.
//!
//! # Guarantees
//!
//! - A failing handler never crashes the consumer; after its bounded retries
//!   the message is dead-lettered exactly once and consumption continues.
//! - Messages are fanned out to a pool of worker tasks partitioned by
//!   aggregate id (`SerializedEvent::key`): the same aggregate always lands
//!   on the same worker, so per-aggregate order is preserved, while a
//!   retrying message only delays messages routed to its own worker and
//!   never stalls the rest of the stream.
//! - On shutdown the worker queues are closed and every in-flight message
//!   (including its retry loop) finishes before the subscription is dropped,
//!   so a completed side effect is not redelivered.
//! - An optional start gate holds processing (messages buffer in the
//!   subscription) until catch-up synchronization has completed.

use crate::handler::{HandleError, HandlerRegistry};
use crate::retry::{RetryPolicy, retry_fixed};
use gavel_core::dead_letter::DeadLetterSink;
use gavel_core::event::SerializedEvent;
use gavel_core::event_bus::EventBus;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Per-worker queue depth; a full queue applies backpressure to the feed.
const WORKER_QUEUE_DEPTH: usize = 64;

fn worker_index(key: &str, workers: usize) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut hasher);
    usize::try_from(hasher.finish() % workers as u64).unwrap_or(0)
}

/// Generic event bus consumer.
///
/// Built via [`EventConsumer::builder`], spawned with
/// [`EventConsumer::spawn`], stopped through the broadcast shutdown channel.
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    registry: HandlerRegistry,
    dead_letter: Arc<dyn DeadLetterSink>,
    shutdown: broadcast::Receiver<()>,
    retry: RetryPolicy,
    reconnect_delay: Duration,
    workers: usize,
    start_gate: Option<watch::Receiver<bool>>,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the subscribe-process-reconnect loop until shutdown.
    pub async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(stream) => {
                            info!(consumer = %self.name, "Subscribed to event bus");

                            // Hold processing until catch-up completes; the
                            // subscription is already live so nothing is lost.
                            if self.wait_for_start_gate().await.is_err() {
                                break;
                            }

                            let drained = self.process_stream(stream).await;
                            if drained {
                                break;
                            }

                            warn!(
                                consumer = %self.name,
                                "Event stream ended, reconnecting in {:?}",
                                self.reconnect_delay
                            );
                            tokio::time::sleep(self.reconnect_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe, retrying in {:?}",
                                self.reconnect_delay
                            );
                            tokio::time::sleep(self.reconnect_delay).await;
                        }
                    }
                }
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Wait until the start gate opens (or shutdown arrives: `Err`).
    async fn wait_for_start_gate(&mut self) -> Result<(), ()> {
        let Some(gate) = self.start_gate.as_mut() else {
            return Ok(());
        };
        if *gate.borrow() {
            return Ok(());
        }
        info!(consumer = %self.name, "Waiting for catch-up to complete before consuming");
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => return Err(()),
                changed = gate.changed() => {
                    if changed.is_err() || *gate.borrow() {
                        // Sender dropped counts as open: catch-up ownership
                        // ended and buffered messages must still drain.
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Process events until the stream ends (`false`) or shutdown (`true`).
    ///
    /// Events are routed to worker tasks by `worker_index(event.key)`, so
    /// same-aggregate messages stay in order while unrelated aggregates
    /// proceed on other workers. Shutdown closes the queues and waits for
    /// every in-flight handler (and its retry loop) to run to completion.
    async fn process_stream(&mut self, mut stream: gavel_core::event_bus::EventStream) -> bool {
        use futures::StreamExt;

        let dispatcher = Arc::new(Dispatcher {
            name: self.name.clone(),
            registry: self.registry.clone(),
            dead_letter: Arc::clone(&self.dead_letter),
            retry: self.retry,
        });

        let mut senders = Vec::with_capacity(self.workers);
        let mut tasks = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let (tx, mut rx) = mpsc::channel::<SerializedEvent>(WORKER_QUEUE_DEPTH);
            let dispatcher = Arc::clone(&dispatcher);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    dispatcher.dispatch(&event).await;
                }
            }));
            senders.push(tx);
        }

        let drained = loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown received, draining workers");
                    break true;
                }
                event_result = stream.next() => {
                    match event_result {
                        Some(Ok(event)) => {
                            let slot = worker_index(&event.key, senders.len());
                            if senders[slot].send(event).await.is_err() {
                                error!(consumer = %self.name, "Worker exited unexpectedly");
                                break false;
                            }
                        }
                        Some(Err(e)) => {
                            // Transport-level error: nothing to dead-letter,
                            // the broker redelivers.
                            error!(consumer = %self.name, error = %e, "Error receiving event");
                        }
                        None => break false,
                    }
                }
            }
        };

        // Close the queues and wait for every worker to finish its backlog
        // before the subscription is dropped.
        drop(senders);
        for task in tasks {
            if let Err(e) = task.await {
                error!(consumer = %self.name, error = %e, "Worker task failed");
            }
        }

        drained
    }
}

/// Dispatch context shared by the worker tasks of one consumer.
struct Dispatcher {
    name: String,
    registry: HandlerRegistry,
    dead_letter: Arc<dyn DeadLetterSink>,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// Dispatch one event through its handler with bounded retry.
    async fn dispatch(&self, event: &SerializedEvent) {
        let Some(handler) = self.registry.get(&event.event_type) else {
            debug!(
                consumer = %self.name,
                event_type = %event.event_type,
                "No handler registered, skipping"
            );
            return;
        };

        let result = retry_fixed(
            self.retry,
            || handler.handle(event),
            HandleError::is_retryable,
        )
        .await;

        if let Err((err, attempts)) = result {
            error!(
                consumer = %self.name,
                event_type = %event.event_type,
                aggregate_id = %event.key,
                attempts,
                error = %err,
                "Handler failed, routing to dead letter queue"
            );
            if let Err(dlq_err) = self
                .dead_letter
                .record(&self.name, event, &err.to_string(), attempts)
                .await
            {
                // Last resort: the failure is logged so the event is not
                // silently lost even when the sink itself is down.
                error!(
                    consumer = %self.name,
                    error = %dlq_err,
                    event = %event,
                    "Failed to record dead-lettered event"
                );
            }
        }
    }
}

/// Builder for [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    registry: Option<HandlerRegistry>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry: Option<RetryPolicy>,
    reconnect_delay: Option<Duration>,
    workers: Option<usize>,
    start_gate: Option<watch::Receiver<bool>>,
}

impl EventConsumerBuilder {
    /// Set the consumer name (used for logging and dead-letter context).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set the event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set the handler dispatch table.
    #[must_use]
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the dead-letter sink.
    #[must_use]
    pub fn dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    /// Set the shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the per-message retry policy (default: 5 attempts, 5 s interval).
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the reconnect delay after a dropped stream (default: 5 s).
    #[must_use]
    pub const fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Set the number of key-partitioned worker tasks (default: 8).
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Gate processing on a readiness signal (catch-up completion).
    #[must_use]
    pub fn start_gate(mut self, gate: watch::Receiver<bool>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    /// Build the [`EventConsumer`].
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing required field.
    pub fn build(self) -> Result<EventConsumer, String> {
        Ok(EventConsumer {
            name: self.name.ok_or("name is required")?,
            topics: self.topics.ok_or("topics are required")?,
            event_bus: self.event_bus.ok_or("event_bus is required")?,
            registry: self.registry.ok_or("registry is required")?,
            dead_letter: self.dead_letter.ok_or("dead_letter is required")?,
            shutdown: self.shutdown.ok_or("shutdown is required")?,
            retry: self.retry.unwrap_or_default(),
            reconnect_delay: self.reconnect_delay.unwrap_or(Duration::from_secs(5)),
            workers: self.workers.unwrap_or(8).max(1),
            start_gate: self.start_gate,
        })
    }
}
