//! The read-optimized auction record and its pure mutation rules.

use chrono::{DateTime, Utc};
use gavel_core::event::{AuctionCreated, AuctionFinished, AuctionUpdated};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an auction in the search projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    /// The auction is live.
    Active,
    /// The auction closed with a winning bid above the reserve.
    Finished,
    /// The auction closed without the reserve being met.
    ReserveNotMet,
}

/// Denormalized mirror of one auction aggregate.
///
/// Exclusively owned and mutated by the search projection; `version` is the
/// highest per-aggregate event version applied so far, which makes
/// duplicate and stale deliveries no-ops.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionItem {
    /// Aggregate identifier (projection key).
    pub id: Uuid,
    /// Highest applied event version.
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
    /// Winning bidder, once finished and sold.
    pub winner: Option<String>,
    /// Winning amount, once finished and sold.
    pub sold_amount: Option<i64>,
    /// Lifecycle status.
    pub status: AuctionStatus,
    /// When the auction closes; default sort/filter key for search.
    pub auction_end: DateTime<Utc>,
    /// When the aggregate was created.
    pub created_at: DateTime<Utc>,
    /// When the projection last touched this record.
    pub updated_at: DateTime<Utc>,
}

impl AuctionItem {
    /// Build a fresh record from a `Created` snapshot.
    #[must_use]
    pub fn from_created(event: &AuctionCreated) -> Self {
        Self {
            id: event.id,
            version: event.version,
            make: event.make.clone(),
            model: event.model.clone(),
            color: event.color.clone(),
            mileage: event.mileage,
            year: event.year,
            reserve_price: event.reserve_price,
            seller: event.seller.clone(),
            winner: None,
            sold_amount: None,
            status: AuctionStatus::Active,
            auction_end: event.auction_end,
            created_at: event.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Merge an update: only present fields change, absent fields keep their
    /// prior values (null-coalescing).
    pub fn apply_update(&mut self, event: &AuctionUpdated) {
        if let Some(make) = &event.make {
            self.make = make.clone();
        }
        if let Some(model) = &event.model {
            self.model = model.clone();
        }
        if let Some(color) = &event.color {
            self.color = color.clone();
        }
        if let Some(mileage) = event.mileage {
            self.mileage = mileage;
        }
        if let Some(year) = event.year {
            self.year = year;
        }
        self.version = event.version;
        self.updated_at = Utc::now();
    }

    /// Close the auction.
    ///
    /// When the item sold, the winning bid decides the status against the
    /// stored reserve. When it did not sell, `winner`/`amount` were never
    /// populated and must not be read: the reserve was by definition not
    /// met, so the record goes straight to [`AuctionStatus::ReserveNotMet`].
    pub fn apply_finish(&mut self, event: &AuctionFinished) {
        if event.item_sold {
            self.winner.clone_from(&event.winner);
            self.sold_amount = event.amount;
            self.status = match event.amount {
                Some(amount) if amount > self.reserve_price => AuctionStatus::Finished,
                _ => AuctionStatus::ReserveNotMet,
            };
        } else {
            self.status = AuctionStatus::ReserveNotMet;
        }
        self.version = event.version;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(reserve: i64) -> AuctionCreated {
        AuctionCreated {
            id: Uuid::new_v4(),
            version: 1,
            make: "Ford".to_string(),
            model: "GT".to_string(),
            color: "White".to_string(),
            mileage: 10,
            year: 2020,
            reserve_price: reserve,
            seller: "alice".to_string(),
            auction_end: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn update_merges_only_present_fields() {
        let mut item = AuctionItem::from_created(&created(100));
        item.apply_update(&AuctionUpdated {
            id: item.id,
            version: 2,
            mileage: Some(500),
            ..AuctionUpdated::default()
        });

        assert_eq!(item.mileage, 500);
        assert_eq!(item.make, "Ford");
        assert_eq!(item.version, 2);
    }

    #[test]
    fn sold_above_reserve_finishes() {
        let mut item = AuctionItem::from_created(&created(100));
        item.apply_finish(&AuctionFinished {
            id: item.id,
            version: 2,
            item_sold: true,
            winner: Some("bob".to_string()),
            amount: Some(150),
        });

        assert_eq!(item.status, AuctionStatus::Finished);
        assert_eq!(item.winner.as_deref(), Some("bob"));
        assert_eq!(item.sold_amount, Some(150));
    }

    #[test]
    fn sold_below_reserve_is_reserve_not_met() {
        let mut item = AuctionItem::from_created(&created(100));
        item.apply_finish(&AuctionFinished {
            id: item.id,
            version: 2,
            item_sold: true,
            winner: Some("bob".to_string()),
            amount: Some(80),
        });

        assert_eq!(item.status, AuctionStatus::ReserveNotMet);
    }

    #[test]
    fn unsold_finish_never_touches_winner_fields() {
        let mut item = AuctionItem::from_created(&created(100));
        item.apply_finish(&AuctionFinished {
            id: item.id,
            version: 2,
            item_sold: false,
            winner: None,
            amount: None,
        });

        assert_eq!(item.status, AuctionStatus::ReserveNotMet);
        assert!(item.winner.is_none());
        assert!(item.sold_amount.is_none());
    }
}
