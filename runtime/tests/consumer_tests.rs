//! Integration tests for the consumer loop: retry bounds, dead-lettering,
//! skip-unknown dispatch, and the catch-up start gate.

#![allow(clippy::unwrap_used, clippy::panic)]

use gavel_core::event::SerializedEvent;
use gavel_runtime::consumer::EventConsumer;
use gavel_runtime::handler::{EventHandler, HandleError, HandlerRegistry};
use gavel_runtime::retry::RetryPolicy;
use gavel_testing::{InMemoryDeadLetterSink, InMemoryEventBus};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Handler whose outcome is fixed and whose invocations are counted.
struct ScriptedHandler {
    calls: AtomicU32,
    outcome: fn() -> Result<(), HandleError>,
}

impl ScriptedHandler {
    fn new(outcome: fn() -> Result<(), HandleError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            outcome,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EventHandler for ScriptedHandler {
    fn handle<'a>(
        &'a self,
        _event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = (self.outcome)();
        Box::pin(async move { result })
    }
}

fn event(event_type: &str) -> SerializedEvent {
    keyed_event(event_type, "agg-1")
}

fn keyed_event(event_type: &str, key: &str) -> SerializedEvent {
    SerializedEvent::new(event_type.to_string(), key.to_string(), vec![1], None)
}

struct Harness {
    bus: InMemoryEventBus,
    sink: Arc<InMemoryDeadLetterSink>,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

async fn start_consumer(
    handler: Arc<ScriptedHandler>,
    gate: Option<watch::Receiver<bool>>,
) -> Harness {
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let (shutdown, rx) = broadcast::channel(1);

    let mut builder = EventConsumer::builder()
        .name("search-auction-created")
        .topics(vec!["auction-events".to_string()])
        .event_bus(Arc::new(bus.clone()))
        .registry(HandlerRegistry::new().with("AuctionCreated.v1", handler))
        .dead_letter(sink.clone())
        .shutdown(rx)
        .retry(RetryPolicy::interval(3, Duration::from_millis(1)));
    if let Some(gate) = gate {
        builder = builder.start_gate(gate);
    }
    let consumer = builder.build().unwrap();
    let task = consumer.spawn();

    // Give the consumer time to subscribe before anything is published.
    tokio::time::sleep(Duration::from_millis(20)).await;

    Harness {
        bus,
        sink,
        shutdown,
        task,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test]
async fn transient_failure_exhausts_retries_then_dead_letters_once() {
    let handler = ScriptedHandler::new(|| Err(HandleError::Transient("store down".to_string())));
    let harness = start_consumer(handler.clone(), None).await;

    use gavel_core::event_bus::EventBus;
    harness
        .bus
        .publish("auction-events", &event("AuctionCreated.v1"))
        .await
        .unwrap();

    let sink = harness.sink.clone();
    wait_until(move || sink.len() == 1).await;

    assert_eq!(handler.calls(), 3);
    let entries = harness.sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 3);
    assert_eq!(entries[0].topic, "search-auction-created");
    assert!(entries[0].error.contains("store down"));

    harness.shutdown.send(()).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn permanent_failure_dead_letters_without_retrying() {
    let handler = ScriptedHandler::new(|| Err(HandleError::Permanent("bad payload".to_string())));
    let harness = start_consumer(handler.clone(), None).await;

    use gavel_core::event_bus::EventBus;
    harness
        .bus
        .publish("auction-events", &event("AuctionCreated.v1"))
        .await
        .unwrap();

    let sink = harness.sink.clone();
    wait_until(move || sink.len() == 1).await;

    assert_eq!(handler.calls(), 1);
    assert_eq!(harness.sink.entries()[0].attempts, 1);

    harness.shutdown.send(()).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn unknown_event_types_are_skipped() {
    let handler = ScriptedHandler::new(|| Ok(()));
    let harness = start_consumer(handler.clone(), None).await;

    use gavel_core::event_bus::EventBus;
    harness
        .bus
        .publish("auction-events", &event("BidPlaced.v1"))
        .await
        .unwrap();
    harness
        .bus
        .publish("auction-events", &event("AuctionCreated.v1"))
        .await
        .unwrap();

    let h = handler.clone();
    wait_until(move || h.calls() == 1).await;

    // The unknown kind was neither handled nor dead-lettered.
    assert_eq!(handler.calls(), 1);
    assert!(harness.sink.is_empty());

    harness.shutdown.send(()).unwrap();
    harness.task.await.unwrap();
}

#[tokio::test]
async fn start_gate_buffers_messages_until_released() {
    let handler = ScriptedHandler::new(|| Ok(()));
    let (gate_tx, gate_rx) = watch::channel(false);
    let harness = start_consumer(handler.clone(), Some(gate_rx)).await;

    use gavel_core::event_bus::EventBus;
    harness
        .bus
        .publish("auction-events", &event("AuctionCreated.v1"))
        .await
        .unwrap();

    // Gate closed: the subscription buffers, nothing is processed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.calls(), 0);

    gate_tx.send(true).unwrap();
    let h = handler.clone();
    wait_until(move || h.calls() == 1).await;

    harness.shutdown.send(()).unwrap();
    harness.task.await.unwrap();
}

/// Fails every delivery for one aggregate, succeeds for every other.
struct StuckAggregateHandler {
    stuck_key: String,
    healthy_calls: AtomicU32,
}

impl EventHandler for StuckAggregateHandler {
    fn handle<'a>(
        &'a self,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandleError>> + Send + 'a>> {
        let stuck = event.key == self.stuck_key;
        if !stuck {
            self.healthy_calls.fetch_add(1, Ordering::SeqCst);
        }
        Box::pin(async move {
            if stuck {
                Err(HandleError::Transient("store down".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

#[tokio::test]
async fn retrying_aggregate_does_not_stall_other_aggregates() {
    let handler = Arc::new(StuckAggregateHandler {
        stuck_key: "agg-stuck".to_string(),
        healthy_calls: AtomicU32::new(0),
    });
    let bus = InMemoryEventBus::new();
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let (shutdown, rx) = broadcast::channel(1);

    // A retry window long enough that any head-of-line blocking would keep
    // the healthy aggregates waiting well past the assertion below.
    let consumer = EventConsumer::builder()
        .name("search-auction-created")
        .topics(vec!["auction-events".to_string()])
        .event_bus(Arc::new(bus.clone()))
        .registry(HandlerRegistry::new().with("AuctionCreated.v1", handler.clone()))
        .dead_letter(sink.clone())
        .shutdown(rx)
        .retry(RetryPolicy::interval(5, Duration::from_millis(500)))
        .build()
        .unwrap();
    let task = consumer.spawn();
    tokio::time::sleep(Duration::from_millis(20)).await;

    use gavel_core::event_bus::EventBus;
    bus.publish("auction-events", &keyed_event("AuctionCreated.v1", "agg-stuck"))
        .await
        .unwrap();
    for i in 0..8 {
        bus.publish(
            "auction-events",
            &keyed_event("AuctionCreated.v1", &format!("agg-{i}")),
        )
        .await
        .unwrap();
    }

    // Healthy aggregates are processed while the stuck one is still inside
    // its retry window (it has not been dead-lettered yet).
    let h = handler.clone();
    wait_until(move || h.healthy_calls.load(Ordering::SeqCst) >= 1).await;
    assert!(sink.is_empty());

    shutdown.send(()).unwrap();
    task.await.unwrap();

    // Shutdown drained the stuck aggregate's retries into the dead letter queue.
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.entries()[0].attempts, 5);
}

#[tokio::test]
async fn successful_handling_leaves_the_dead_letter_queue_empty() {
    let handler = ScriptedHandler::new(|| Ok(()));
    let harness = start_consumer(handler.clone(), None).await;

    use gavel_core::event_bus::EventBus;
    for _ in 0..3 {
        harness
            .bus
            .publish("auction-events", &event("AuctionCreated.v1"))
            .await
            .unwrap();
    }

    let h = handler.clone();
    wait_until(move || h.calls() == 3).await;
    assert!(harness.sink.is_empty());

    harness.shutdown.send(()).unwrap();
    harness.task.await.unwrap();
}
