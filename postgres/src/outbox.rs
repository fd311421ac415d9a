//! Transactional outbox for reliable event publication.
//!
//! The producer writes its aggregate mutation and the corresponding event
//! row in the same database transaction; if the transaction rolls back, the
//! event row rolls back with it, so the bus never sees an event for a
//! mutation that did not commit. A background dispatcher drains unpublished
//! rows in insert order and marks each one published only after the broker
//! acknowledges it — a crash between publish and mark yields a duplicate
//! delivery, which consumers absorb idempotently.
//!
//! ```sql
//! CREATE TABLE outbox_events (
//!     id BIGSERIAL PRIMARY KEY,
//!     event_type TEXT NOT NULL,
//!     key TEXT NOT NULL,
//!     data BYTEA NOT NULL,
//!     metadata JSONB,
//!     topic TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     published_at TIMESTAMPTZ
//! );
//! ```

use gavel_core::event::SerializedEvent;
use gavel_core::event_bus::EventBus;
use gavel_runtime::retry::retry_forever;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Backoff ceiling for publish retries while the broker is down.
const PUBLISH_RETRY_CEILING: Duration = Duration::from_secs(30);

/// Errors from outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The outbox table could not be read or written.
    #[error("Outbox storage error: {0}")]
    Storage(String),
}

/// One unpublished row, in the shape the dispatcher publishes.
#[derive(Debug)]
struct OutboxRow {
    id: i64,
    topic: String,
    event: SerializedEvent,
}

/// Enqueues events inside the caller's transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Outbox;

impl Outbox {
    /// Insert an event row within `tx`.
    ///
    /// The row commits or rolls back together with the caller's aggregate
    /// mutation; this is the only way events enter the system.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the insert fails.
    pub async fn enqueue(
        tx: &mut Transaction<'_, Postgres>,
        topic: &str,
        event: &SerializedEvent,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            r"
            INSERT INTO outbox_events (event_type, key, data, metadata, topic)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&event.event_type)
        .bind(&event.key)
        .bind(&event.data)
        .bind(event.metadata.as_ref())
        .bind(topic)
        .execute(&mut **tx)
        .await
        .map_err(|e| OutboxError::Storage(format!("Failed to enqueue: {e}")))?;

        debug!(event_type = %event.event_type, key = %event.key, topic, "Event enqueued");
        Ok(())
    }
}

/// Drains committed outbox rows to the event bus.
///
/// Rows are published in insert order, which preserves per-aggregate order
/// downstream, and are marked published only after the broker acknowledges.
pub struct OutboxDispatcher {
    pool: PgPool,
    event_bus: Arc<dyn EventBus>,
    poll_interval: Duration,
    batch_size: i64,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxDispatcher {
    /// Create a dispatcher over the outbox table.
    #[must_use]
    pub fn new(
        pool: PgPool,
        event_bus: Arc<dyn EventBus>,
        poll_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            pool,
            event_bus,
            poll_interval,
            batch_size: 100,
            shutdown,
        }
    }

    /// Drain and publish until shutdown.
    pub async fn run(self) {
        info!(poll_ms = self.poll_interval.as_millis(), "Outbox dispatcher started");
        let mut shutdown = self.shutdown.resubscribe();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Outbox dispatcher shutting down");
                    return;
                }
                result = self.drain_once() => {
                    match result {
                        Ok(0) => tokio::time::sleep(self.poll_interval).await,
                        Ok(published) => debug!(published, "Outbox batch published"),
                        Err(e) => {
                            error!(error = %e, "Outbox drain failed, backing off");
                            tokio::time::sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }
    }

    /// Publish one batch of unpublished rows in insert order.
    ///
    /// Broker publishes retry indefinitely with capped backoff; a down broker
    /// stalls the drain rather than dropping or reordering events.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the outbox table fails.
    pub async fn drain_once(&self) -> Result<usize, OutboxError> {
        let rows = self.fetch_unpublished().await?;
        let count = rows.len();

        for row in rows {
            retry_forever(
                Duration::from_secs(3),
                PUBLISH_RETRY_CEILING,
                || self.event_bus.publish(&row.topic, &row.event),
            )
            .await;

            self.mark_published(row.id).await?;
            debug!(
                outbox_id = row.id,
                event_type = %row.event.event_type,
                topic = %row.topic,
                "Outbox row published"
            );
        }

        Ok(count)
    }

    /// Number of rows still awaiting publication.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the query fails.
    pub async fn pending_count(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| OutboxError::Storage(format!("Failed to count pending: {e}")))?;
        Ok(count)
    }

    async fn fetch_unpublished(&self) -> Result<Vec<OutboxRow>, OutboxError> {
        let rows = sqlx::query(
            r"
            SELECT id, event_type, key, data, metadata, topic
            FROM outbox_events
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT $1
            ",
        )
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(format!("Failed to fetch unpublished: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| OutboxRow {
                id: row.get("id"),
                topic: row.get("topic"),
                event: SerializedEvent {
                    event_type: row.get("event_type"),
                    key: row.get("key"),
                    data: row.get("data"),
                    metadata: row.get("metadata"),
                },
            })
            .collect())
    }

    async fn mark_published(&self, id: i64) -> Result<(), OutboxError> {
        sqlx::query("UPDATE outbox_events SET published_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| OutboxError::Storage(format!("Failed to mark published: {e}")))?;
        Ok(())
    }
}
