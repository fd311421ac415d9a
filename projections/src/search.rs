//! Idempotent search projection applier.
//!
//! Applies [`AuctionEvent`]s to the read model with the guarantees the
//! at-least-once transport demands:
//!
//! - **Idempotence**: re-applying an event with the same version is a no-op.
//! - **Version awareness**: an event older than the stored record is ignored
//!   instead of clobbering newer state.
//! - **Out-of-order tolerance**: an `Updated` arriving before its `Created`
//!   is buffered under a pending key and reconciled when the snapshot lands;
//!   a `Finished` for an unseen aggregate surfaces as a recoverable
//!   missing-aggregate error so the runtime retries it.
//! - **Deletion is terminal**: aggregate ids are never reused, so a delete
//!   leaves a tombstone and any event for that id arriving afterwards is
//!   dropped instead of resurrecting state or re-filling the pending buffer.
//! - **Isolation by key**: records are keyed by aggregate id; unrelated
//!   auctions never interact.

use crate::item::AuctionItem;
use gavel_core::event::{
    AuctionCreated, AuctionDeleted, AuctionEvent, AuctionFinished, AuctionUpdated, SerializedEvent,
};
use gavel_core::projection::{ProjectionError, ProjectionStore, Result};
use gavel_runtime::handler::{EventHandler, HandleError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

fn record_key(id: Uuid) -> String {
    format!("auction:{id}")
}

fn pending_key(id: Uuid) -> String {
    format!("auction:{id}:pending")
}

fn tombstone_key(id: Uuid) -> String {
    format!("auction:{id}:deleted")
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ProjectionError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| ProjectionError::Serialization(e.to_string()))
}

/// The search read model applier.
#[derive(Clone)]
pub struct SearchProjection {
    store: Arc<dyn ProjectionStore>,
}

impl SearchProjection {
    /// Create a projection over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    /// Apply a domain event. Safe to re-apply with identical input.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::MissingAggregate`] when a `Finished` event
    /// references an unseen aggregate (recoverable), or a storage error.
    pub async fn apply(&self, event: &AuctionEvent) -> Result<()> {
        match event {
            AuctionEvent::Created(e) => self.apply_created(e).await,
            AuctionEvent::Updated(e) => self.apply_updated(e).await,
            AuctionEvent::Deleted(e) => self.apply_deleted(e).await,
            AuctionEvent::Finished(e) => self.apply_finished(e).await,
        }
    }

    /// Fetch the current record for an aggregate, if any.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub async fn get(&self, id: Uuid) -> Result<Option<AuctionItem>> {
        match self.store.get(&record_key(id)).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether the aggregate has been deleted (ids are never reused).
    async fn is_deleted(&self, id: Uuid) -> Result<bool> {
        self.store.exists(&tombstone_key(id)).await
    }

    async fn apply_created(&self, event: &AuctionCreated) -> Result<()> {
        if self.is_deleted(event.id).await? {
            debug!(aggregate_id = %event.id, "Skipping Created for deleted aggregate");
            return Ok(());
        }
        if let Some(existing) = self.get(event.id).await? {
            if existing.version >= event.version {
                debug!(
                    aggregate_id = %event.id,
                    stored = existing.version,
                    incoming = event.version,
                    "Skipping stale Created"
                );
                return Ok(());
            }
        }

        let item = AuctionItem::from_created(event);
        self.reconcile_and_save(item).await
    }

    async fn apply_updated(&self, event: &AuctionUpdated) -> Result<()> {
        if self.is_deleted(event.id).await? {
            debug!(aggregate_id = %event.id, "Skipping Updated for deleted aggregate");
            return Ok(());
        }
        match self.get(event.id).await? {
            Some(mut item) => {
                if item.version >= event.version {
                    debug!(
                        aggregate_id = %event.id,
                        stored = item.version,
                        incoming = event.version,
                        "Skipping stale Updated"
                    );
                    return Ok(());
                }
                item.apply_update(event);
                self.store
                    .save(&record_key(event.id), &encode(&item)?)
                    .await
            }
            None => {
                // Created has not landed yet; buffer and reconcile later.
                let key = pending_key(event.id);
                let mut pending: Vec<AuctionUpdated> = match self.store.get(&key).await? {
                    Some(bytes) => decode(&bytes)?,
                    None => Vec::new(),
                };
                if !pending.iter().any(|p| p.version == event.version) {
                    pending.push(event.clone());
                }
                info!(
                    aggregate_id = %event.id,
                    buffered = pending.len(),
                    "Buffered Updated ahead of Created"
                );
                self.store.save(&key, &encode(&pending)?).await
            }
        }
    }

    async fn apply_deleted(&self, event: &AuctionDeleted) -> Result<()> {
        // Deleting twice, or deleting an id never seen, is a no-op. The
        // tombstone keeps stragglers for this id from re-creating state.
        self.store.delete(&record_key(event.id)).await?;
        self.store.delete(&pending_key(event.id)).await?;
        self.store.save(&tombstone_key(event.id), &[]).await
    }

    async fn apply_finished(&self, event: &AuctionFinished) -> Result<()> {
        if self.is_deleted(event.id).await? {
            debug!(aggregate_id = %event.id, "Skipping Finished for deleted aggregate");
            return Ok(());
        }
        let Some(mut item) = self.get(event.id).await? else {
            return Err(ProjectionError::MissingAggregate(event.id.to_string()));
        };
        if item.version >= event.version {
            debug!(
                aggregate_id = %event.id,
                stored = item.version,
                incoming = event.version,
                "Skipping stale Finished"
            );
            return Ok(());
        }
        item.apply_finish(event);
        self.store
            .save(&record_key(event.id), &encode(&item)?)
            .await
    }

    /// Upsert a catch-up snapshot row through the same idempotence rules as
    /// live events: not-newer snapshots are ignored, buffered updates newer
    /// than the snapshot are re-merged.
    ///
    /// # Errors
    ///
    /// Returns a storage or serialization error.
    pub async fn upsert_snapshot(&self, item: AuctionItem) -> Result<()> {
        if self.is_deleted(item.id).await? {
            debug!(aggregate_id = %item.id, "Skipping snapshot for deleted aggregate");
            return Ok(());
        }
        if self
            .get(item.id)
            .await?
            .is_some_and(|existing| existing.version >= item.version)
        {
            return Ok(());
        }
        self.reconcile_and_save(item).await
    }

    /// Merge any buffered out-of-order updates newer than `item`, clear the
    /// buffer, and persist the record.
    async fn reconcile_and_save(&self, mut item: AuctionItem) -> Result<()> {
        let pkey = pending_key(item.id);
        if let Some(bytes) = self.store.get(&pkey).await? {
            let mut pending: Vec<AuctionUpdated> = decode(&bytes)?;
            pending.sort_by_key(|p| p.version);
            let base_version = item.version;
            for update in pending.iter().filter(|p| p.version > base_version) {
                item.apply_update(update);
            }
            self.store.delete(&pkey).await?;
            info!(aggregate_id = %item.id, "Reconciled buffered updates");
        }
        self.store.save(&record_key(item.id), &encode(&item)?).await
    }
}

/// [`EventHandler`] adapter: deserializes the wire payload and applies it.
pub struct SearchHandler {
    projection: SearchProjection,
}

impl SearchHandler {
    /// Wrap a projection for consumption by the runtime.
    #[must_use]
    pub const fn new(projection: SearchProjection) -> Self {
        Self { projection }
    }
}

impl EventHandler for SearchHandler {
    fn handle<'a>(
        &'a self,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), HandleError>> + Send + 'a>> {
        Box::pin(async move {
            // A payload that cannot decode will never decode; don't retry it.
            let domain_event = AuctionEvent::from_bytes(&event.data)
                .map_err(|e| HandleError::Permanent(e.to_string()))?;

            self.projection
                .apply(&domain_event)
                .await
                .map_err(|e| match e {
                    ProjectionError::MissingAggregate(id) => HandleError::MissingAggregate(id),
                    ProjectionError::Serialization(msg) => HandleError::Permanent(msg),
                    ProjectionError::Storage(msg) | ProjectionError::EventProcessing(msg) => {
                        HandleError::Transient(msg)
                    }
                })
        })
    }
}
