//! `PostgreSQL`-backed dead-letter queue.
//!
//! Messages that exhaust their bounded retries, or fail permanently, land in
//! the `failed_events` table with the raw payload and failure context
//! preserved. Entries stay until an operator resolves or discards them;
//! nothing here is dropped automatically.

use chrono::{DateTime, Utc};
use gavel_core::dead_letter::{DeadLetterError, DeadLetterSink};
use gavel_core::event::SerializedEvent;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of a dead-lettered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Awaiting investigation or reprocessing.
    Pending,
    /// Successfully reprocessed.
    Resolved,
    /// Permanently discarded.
    Discarded,
}

impl DlqStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the string is not a known
    /// status.
    pub fn parse(s: &str) -> Result<Self, DeadLetterError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(DeadLetterError::Storage(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// A dead-lettered event with its failure context.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Unique identifier of this entry.
    pub id: i64,
    /// The consumer/queue the failure came from.
    pub topic: String,
    /// The failed event, payload preserved byte-for-byte.
    pub event: SerializedEvent,
    /// Error message from the final failure.
    pub error_message: String,
    /// Handler invocations made before giving up.
    pub attempts: i32,
    /// When the entry was recorded.
    pub failed_at: DateTime<Utc>,
    /// Current status.
    pub status: DlqStatus,
    /// When the entry was resolved or discarded, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Notes about the resolution.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based [`DeadLetterSink`] and inspection API.
///
/// ```sql
/// CREATE TABLE failed_events (
///     id BIGSERIAL PRIMARY KEY,
///     topic TEXT NOT NULL,
///     event_type TEXT NOT NULL,
///     key TEXT NOT NULL,
///     event_data BYTEA NOT NULL,
///     metadata JSONB,
///     error_message TEXT NOT NULL,
///     attempts INT NOT NULL,
///     failed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
///     status TEXT NOT NULL DEFAULT 'pending',
///     resolved_at TIMESTAMPTZ,
///     resolution_notes TEXT
/// );
/// ```
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a queue over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn list_pending(&self, limit: i64) -> Result<Vec<FailedEvent>, DeadLetterError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic, event_type, key, event_data, metadata,
                   error_message, attempts, failed_at, status,
                   resolved_at, resolution_notes
            FROM failed_events
            WHERE status = 'pending'
            ORDER BY failed_at ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_failed_event).collect()
    }

    /// Count of pending entries, for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, DeadLetterError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| DeadLetterError::Storage(e.to_string()))?;
        Ok(count)
    }

    /// Mark an entry as successfully reprocessed.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_resolved(
        &self,
        id: i64,
        notes: Option<&str>,
    ) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'resolved', resolved_at = now(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::info!(dlq_id = id, "Dead-letter entry resolved");
        Ok(())
    }

    /// Mark an entry as permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`DeadLetterError::Storage`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), DeadLetterError> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'discarded', resolved_at = now(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

        tracing::warn!(dlq_id = id, reason, "Dead-letter entry discarded");
        Ok(())
    }

    fn row_to_failed_event(row: &sqlx::postgres::PgRow) -> Result<FailedEvent, DeadLetterError> {
        let status_str: String = row.get("status");
        let status = DlqStatus::parse(&status_str)?;

        Ok(FailedEvent {
            id: row.get("id"),
            topic: row.get("topic"),
            event: SerializedEvent {
                event_type: row.get("event_type"),
                key: row.get("key"),
                data: row.get("event_data"),
                metadata: row.get("metadata"),
            },
            error_message: row.get("error_message"),
            attempts: row.get("attempts"),
            failed_at: row.get("failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record(
        &self,
        topic: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadLetterError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        let error = error.to_string();
        Box::pin(async move {
            // Attempts are bounded by the retry policy, far below i32::MAX.
            #[allow(clippy::cast_possible_wrap)]
            let attempts_i32 = attempts as i32;

            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO failed_events (
                    topic, event_type, key, event_data, metadata,
                    error_message, attempts
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                ",
            )
            .bind(&topic)
            .bind(&event.event_type)
            .bind(&event.key)
            .bind(&event.data)
            .bind(event.metadata.as_ref())
            .bind(&error)
            .bind(attempts_i32)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DeadLetterError::Storage(e.to_string()))?;

            tracing::warn!(
                dlq_id = id,
                topic = %topic,
                event_type = %event.event_type,
                aggregate_id = %event.key,
                attempts,
                error = %error,
                "Event added to dead letter queue"
            );

            Ok(())
        })
    }
}
