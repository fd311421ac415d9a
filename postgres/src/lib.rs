//! `PostgreSQL` durability layer for the auction platform's producer side.
//!
//! Two concerns live here:
//!
//! - [`outbox`] — the transactional outbox: events are committed in the same
//!   transaction as the aggregate mutation and drained to the bus by a
//!   background dispatcher, so the bus never sees uncommitted mutations.
//! - [`dead_letter_queue`] — durable storage for messages that exhausted
//!   their retries, with an operator-facing inspection API.

pub mod dead_letter_queue;
pub mod outbox;

pub use dead_letter_queue::{DeadLetterQueue, DlqStatus, FailedEvent};
pub use outbox::{Outbox, OutboxDispatcher, OutboxError};

use sqlx::PgPool;

/// Run database migrations for the outbox and dead-letter tables.
///
/// # Errors
///
/// Returns [`OutboxError::Storage`] if migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), OutboxError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| OutboxError::Storage(format!("Migration failed: {e}")))?;
    Ok(())
}
