//! Catch-up synchronization against the producer's read API.
//!
//! On startup (or after downtime) the projection pages through the
//! authoritative service's snapshot endpoint, filtered to rows changed since
//! the stored watermark, and upserts each row through the same version-aware
//! path live events use. Only once the final page has been applied does the
//! synchronizer flip the readiness gate that releases live consumption;
//! the subscription is established first, so anything published during
//! catch-up buffers at the broker instead of being lost.

use crate::item::{AuctionItem, AuctionStatus};
use crate::search::SearchProjection;
use chrono::{DateTime, Utc};
use gavel_core::config::CatchupConfig;
use gavel_core::projection::{ProjectionError, ProjectionStore, Result};
use gavel_runtime::retry::retry_forever;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

const WATERMARK_KEY: &str = "catchup:watermark";

/// Backoff ceiling for snapshot fetches while the read API is down.
const RETRY_CEILING: Duration = Duration::from_secs(30);

/// Errors from fetching snapshot pages.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The read API could not be reached or returned a failure status.
    #[error("Snapshot request failed: {0}")]
    Request(String),

    /// The response body did not match the expected page shape.
    #[error("Snapshot response malformed: {0}")]
    Malformed(String),
}

/// One auction row as served by the producer's read API.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Per-aggregate version at the time of the snapshot.
    pub version: u64,
    /// Vehicle make.
    pub make: String,
    /// Vehicle model.
    pub model: String,
    /// Vehicle color.
    pub color: String,
    /// Odometer reading.
    pub mileage: i32,
    /// Model year.
    pub year: i32,
    /// Seller's reserve.
    pub reserve_price: i64,
    /// Seller username.
    pub seller: String,
    /// Winning bidder, if finished and sold.
    pub winner: Option<String>,
    /// Winning amount, if finished and sold.
    pub sold_amount: Option<i64>,
    /// Lifecycle status as the producer reports it.
    pub status: String,
    /// When the auction closes.
    pub auction_end: DateTime<Utc>,
    /// When the aggregate was created.
    pub created_at: DateTime<Utc>,
    /// When the aggregate last changed; drives the watermark.
    pub updated_at: DateTime<Utc>,
}

impl AuctionSnapshot {
    /// Convert a snapshot row into a projection record.
    #[must_use]
    pub fn into_item(self) -> AuctionItem {
        let status = match self.status.as_str() {
            "Finished" => AuctionStatus::Finished,
            "ReserveNotMet" => AuctionStatus::ReserveNotMet,
            _ => AuctionStatus::Active,
        };
        AuctionItem {
            id: self.id,
            version: self.version,
            make: self.make,
            model: self.model,
            color: self.color,
            mileage: self.mileage,
            year: self.year,
            reserve_price: self.reserve_price,
            seller: self.seller,
            winner: self.winner,
            sold_amount: self.sold_amount,
            status,
            auction_end: self.auction_end,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// One page of snapshot rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPage {
    /// Rows in this page.
    pub results: Vec<AuctionSnapshot>,
    /// Total number of pages for the query.
    pub page_count: u32,
    /// Total number of matching rows.
    pub total_count: u64,
}

/// Source of auction snapshots, abstracted for testing.
pub trait SnapshotClient: Send + Sync {
    /// Fetch one page of auctions changed strictly after `since` (all
    /// auctions when `since` is `None`).
    fn fetch_page(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<SnapshotPage, SnapshotError>> + Send + '_>>;
}

/// [`SnapshotClient`] over the producer's HTTP read API.
pub struct HttpSnapshotClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotClient {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl SnapshotClient for HttpSnapshotClient {
    fn fetch_page(
        &self,
        since: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<SnapshotPage, SnapshotError>> + Send + '_>>
    {
        let mut url = format!(
            "{}/api/auctions?page={page}&pageSize={page_size}",
            self.base_url
        );
        if let Some(since) = since {
            url.push_str(&format!("&date={}", since.to_rfc3339()));
        }

        Box::pin(async move {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SnapshotError::Request(e.to_string()))?
                .error_for_status()
                .map_err(|e| SnapshotError::Request(e.to_string()))?;

            response
                .json::<SnapshotPage>()
                .await
                .map_err(|e| SnapshotError::Malformed(e.to_string()))
        })
    }
}

/// Pages snapshot rows into the projection and releases the start gate.
pub struct CatchupSync {
    client: Arc<dyn SnapshotClient>,
    projection: SearchProjection,
    store: Arc<dyn ProjectionStore>,
    page_size: u32,
    retry_interval: Duration,
}

impl CatchupSync {
    /// Build a synchronizer from configuration.
    pub fn new(
        client: Arc<dyn SnapshotClient>,
        projection: SearchProjection,
        store: Arc<dyn ProjectionStore>,
        config: &CatchupConfig,
    ) -> Self {
        Self {
            client,
            projection,
            store,
            page_size: config.page_size,
            retry_interval: config.retry_interval(),
        }
    }

    /// Run one full catch-up pass, then signal `ready`.
    ///
    /// Page fetches retry indefinitely with capped backoff, so a down read
    /// API delays readiness rather than failing startup. Snapshot rows go
    /// through the version-aware upsert, so re-running catch-up is harmless.
    ///
    /// # Errors
    ///
    /// Returns a storage error from the projection store; transport errors
    /// are retried internally and never surface.
    pub async fn run(&self, ready: &watch::Sender<bool>) -> Result<()> {
        let since = self.watermark().await?;
        match since {
            Some(ts) => info!(since = %ts, "Starting catch-up from watermark"),
            None => info!("Starting full catch-up (no watermark)"),
        }

        let mut page: u32 = 1;
        let mut newest: Option<DateTime<Utc>> = since;
        let mut applied: u64 = 0;

        loop {
            let fetched = retry_forever(self.retry_interval, RETRY_CEILING, || {
                self.client.fetch_page(since, page, self.page_size)
            })
            .await;

            let page_count = fetched.page_count;
            for snapshot in fetched.results {
                if newest.is_none_or(|ts| snapshot.updated_at > ts) {
                    newest = Some(snapshot.updated_at);
                }
                self.projection.upsert_snapshot(snapshot.into_item()).await?;
                applied += 1;
            }

            if page >= page_count {
                break;
            }
            page += 1;
        }

        if let Some(ts) = newest {
            self.save_watermark(ts).await?;
        }

        info!(applied, "Catch-up complete, releasing consumer gate");
        if ready.send(true).is_err() {
            warn!("No consumer is waiting on the start gate");
        }
        Ok(())
    }

    /// The stored watermark, if a previous catch-up completed.
    async fn watermark(&self) -> Result<Option<DateTime<Utc>>> {
        match self.store.get(WATERMARK_KEY).await? {
            Some(bytes) => {
                let raw = String::from_utf8(bytes)
                    .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
                let ts = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| ProjectionError::Serialization(e.to_string()))?;
                Ok(Some(ts.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    async fn save_watermark(&self, ts: DateTime<Utc>) -> Result<()> {
        self.store
            .save(WATERMARK_KEY, ts.to_rfc3339().as_bytes())
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gavel_testing::InMemoryProjectionStore;
    use std::sync::Mutex;

    struct FixedPages {
        pages: Vec<SnapshotPage>,
        requested_since: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    impl SnapshotClient for FixedPages {
        fn fetch_page(
            &self,
            since: Option<DateTime<Utc>>,
            page: u32,
            _page_size: u32,
        ) -> Pin<
            Box<dyn Future<Output = std::result::Result<SnapshotPage, SnapshotError>> + Send + '_>,
        > {
            self.requested_since.lock().unwrap().push(since);
            let result = self
                .pages
                .get((page - 1) as usize)
                .cloned()
                .ok_or_else(|| SnapshotError::Request(format!("no page {page}")));
            Box::pin(async move { result })
        }
    }

    fn snapshot(version: u64, updated_at: DateTime<Utc>) -> AuctionSnapshot {
        AuctionSnapshot {
            id: Uuid::new_v4(),
            version,
            make: "Ford".to_string(),
            model: "GT".to_string(),
            color: "White".to_string(),
            mileage: 100,
            year: 2020,
            reserve_price: 100,
            seller: "alice".to_string(),
            winner: None,
            sold_amount: None,
            status: "Live".to_string(),
            auction_end: Utc::now(),
            created_at: Utc::now(),
            updated_at,
        }
    }

    fn sync_over(
        client: Arc<dyn SnapshotClient>,
        store: Arc<InMemoryProjectionStore>,
    ) -> CatchupSync {
        let config = CatchupConfig {
            auction_service_url: "http://localhost:7001".to_string(),
            page_size: 2,
            retry_interval_secs: 0,
        };
        CatchupSync::new(
            client,
            SearchProjection::new(store.clone()),
            store,
            &config,
        )
    }

    #[tokio::test]
    async fn applies_every_row_across_pages_then_signals_ready() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(10);
        let client = Arc::new(FixedPages {
            pages: vec![
                SnapshotPage {
                    results: vec![snapshot(1, t1), snapshot(1, t2)],
                    page_count: 2,
                    total_count: 3,
                },
                SnapshotPage {
                    results: vec![snapshot(1, t1)],
                    page_count: 2,
                    total_count: 3,
                },
            ],
            requested_since: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryProjectionStore::new());
        let sync = sync_over(client.clone(), store.clone());

        let (tx, rx) = watch::channel(false);
        sync.run(&tx).await.unwrap();

        assert!(*rx.borrow());
        // 3 auction records plus the watermark key.
        assert_eq!(store.len(), 4);
        assert!(store.exists(WATERMARK_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn second_run_filters_from_stored_watermark() {
        let t1 = Utc::now();
        let client = Arc::new(FixedPages {
            pages: vec![SnapshotPage {
                results: vec![snapshot(1, t1)],
                page_count: 1,
                total_count: 1,
            }],
            requested_since: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryProjectionStore::new());

        let sync = sync_over(client.clone(), store.clone());
        let (tx, _rx) = watch::channel(false);
        sync.run(&tx).await.unwrap();
        sync.run(&tx).await.unwrap();

        let requested = client.requested_since.lock().unwrap().clone();
        assert_eq!(requested[0], None);
        assert_eq!(requested[1], Some(t1));
    }

    #[test]
    fn snapshot_status_maps_to_projection_status() {
        let mut s = snapshot(1, Utc::now());
        s.status = "ReserveNotMet".to_string();
        assert_eq!(s.into_item().status, AuctionStatus::ReserveNotMet);
    }
}
