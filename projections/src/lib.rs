//! Search read model for the auction platform.
//!
//! This crate owns the denormalized auction record and everything that keeps
//! it consistent with the authoritative service:
//!
//! - [`item`] — the read-optimized record and its pure mutation rules
//! - [`search`] — the idempotent, version-aware event applier
//! - [`catchup`] — startup synchronization against the producer's read API
//! - [`query`] — enum-keyed sort/filter strategies and pagination
//! - [`postgres`] — `PostgreSQL`-backed storage for the records

pub mod catchup;
pub mod item;
pub mod postgres;
pub mod query;
pub mod search;

pub use catchup::{AuctionSnapshot, CatchupSync, HttpSnapshotClient, SnapshotClient, SnapshotPage};
pub use item::{AuctionItem, AuctionStatus};
pub use postgres::PostgresProjectionStore;
pub use query::{FilterKey, PagedResult, SearchParams, SortKey, search};
pub use search::{SearchHandler, SearchProjection};
