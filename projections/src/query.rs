//! Search ordering and filtering strategies.
//!
//! Sort and filter selections are closed enums parsed once at the API
//! boundary; an unrecognized key is a caller error, not a silent fallback.
//! The apply functions are pure so they test without any storage.

use crate::item::AuctionItem;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for unrecognized sort or filter keys.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    /// The sort key is not one of the supported orderings.
    #[error("Unknown sort key: {0}")]
    UnknownSortKey(String),

    /// The filter key is not one of the supported filters.
    #[error("Unknown filter key: {0}")]
    UnknownFilterKey(String),
}

/// Supported result orderings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    /// Alphabetical by make, then model.
    Make,
    /// Most recently created first.
    Newest,
    /// Soonest auction end first (the default).
    EndingSoon,
}

impl SortKey {
    /// Parse a wire-level key.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownSortKey`] for anything outside the
    /// supported set.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "make" => Ok(Self::Make),
            "new" => Ok(Self::Newest),
            "endingSoon" => Ok(Self::EndingSoon),
            other => Err(QueryError::UnknownSortKey(other.to_string())),
        }
    }
}

impl Default for SortKey {
    fn default() -> Self {
        Self::EndingSoon
    }
}

/// Supported lifecycle filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKey {
    /// Auctions that have not yet ended (the default).
    Live,
    /// Auctions whose end time has passed.
    Finished,
    /// Auctions ending within the next six hours.
    EndingSoon,
}

impl FilterKey {
    /// Parse a wire-level key.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownFilterKey`] for anything outside the
    /// supported set.
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "live" => Ok(Self::Live),
            "finished" => Ok(Self::Finished),
            "endingSoon" => Ok(Self::EndingSoon),
            other => Err(QueryError::UnknownFilterKey(other.to_string())),
        }
    }
}

impl Default for FilterKey {
    fn default() -> Self {
        Self::Live
    }
}

/// A full search request against the read model.
#[derive(Clone, Debug, Default)]
pub struct SearchParams {
    /// Free-text match against make and model (case-insensitive).
    pub search_term: Option<String>,
    /// Restrict to auctions by this seller.
    pub seller: Option<String>,
    /// Restrict to auctions won by this bidder.
    pub winner: Option<String>,
    /// Result ordering.
    pub sort: SortKey,
    /// Lifecycle filter.
    pub filter: FilterKey,
    /// 1-based page number.
    pub page_number: u32,
    /// Rows per page.
    pub page_size: u32,
}

impl SearchParams {
    /// Defaults matching the read API: page 1, four rows, live auctions
    /// ending soonest first.
    #[must_use]
    pub fn new() -> Self {
        Self {
            page_number: 1,
            page_size: 4,
            ..Self::default()
        }
    }
}

/// A page of search results with paging metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    /// Rows in this page.
    pub results: Vec<T>,
    /// Total number of pages for the query.
    pub page_count: u32,
    /// Total number of matching rows.
    pub total_count: u64,
}

/// Execute a search over a materialized set of records.
#[must_use]
pub fn search(items: &[AuctionItem], params: &SearchParams) -> PagedResult<AuctionItem> {
    let now = Utc::now();
    let soon = now + Duration::hours(6);

    let mut matched: Vec<AuctionItem> = items
        .iter()
        .filter(|item| match params.filter {
            FilterKey::Live => item.auction_end > now,
            FilterKey::Finished => item.auction_end < now,
            FilterKey::EndingSoon => item.auction_end > now && item.auction_end < soon,
        })
        .filter(|item| {
            params.search_term.as_deref().is_none_or(|term| {
                let term = term.to_lowercase();
                item.make.to_lowercase().contains(&term)
                    || item.model.to_lowercase().contains(&term)
            })
        })
        .filter(|item| params.seller.as_deref().is_none_or(|s| item.seller == s))
        .filter(|item| {
            params
                .winner
                .as_deref()
                .is_none_or(|w| item.winner.as_deref() == Some(w))
        })
        .cloned()
        .collect();

    match params.sort {
        SortKey::Make => matched.sort_by(|a, b| {
            a.make
                .cmp(&b.make)
                .then_with(|| a.model.cmp(&b.model))
        }),
        SortKey::Newest => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::EndingSoon => matched.sort_by(|a, b| a.auction_end.cmp(&b.auction_end)),
    }

    paginate(matched, params.page_number, params.page_size)
}

/// Slice a sorted result set into the requested page.
#[must_use]
pub fn paginate<T>(items: Vec<T>, page_number: u32, page_size: u32) -> PagedResult<T> {
    let total_count = items.len() as u64;
    let page_size = page_size.max(1);
    let page_count = items.len().div_ceil(page_size as usize) as u32;

    let start = (page_number.max(1) - 1) as usize * page_size as usize;
    let results: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();

    PagedResult {
        results,
        page_count,
        total_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::item::AuctionStatus;
    use gavel_core::event::AuctionCreated;
    use uuid::Uuid;

    fn item(make: &str, model: &str, end_offset_hours: i64) -> AuctionItem {
        let now = Utc::now();
        AuctionItem::from_created(&AuctionCreated {
            id: Uuid::new_v4(),
            version: 1,
            make: make.to_string(),
            model: model.to_string(),
            color: "Black".to_string(),
            mileage: 1000,
            year: 2020,
            reserve_price: 100,
            seller: "alice".to_string(),
            auction_end: now + Duration::hours(end_offset_hours),
            created_at: now,
        })
    }

    #[test]
    fn unknown_keys_are_rejected_at_the_boundary() {
        assert_eq!(
            SortKey::parse("price"),
            Err(QueryError::UnknownSortKey("price".to_string()))
        );
        assert_eq!(
            FilterKey::parse("cancelled"),
            Err(QueryError::UnknownFilterKey("cancelled".to_string()))
        );
        assert_eq!(SortKey::parse("endingSoon").unwrap(), SortKey::EndingSoon);
        assert_eq!(FilterKey::parse("finished").unwrap(), FilterKey::Finished);
    }

    #[test]
    fn ending_soon_filter_is_a_six_hour_window() {
        let items = vec![item("Ford", "GT", 2), item("Audi", "A4", 12), item("BMW", "M3", -1)];
        let params = SearchParams {
            filter: FilterKey::EndingSoon,
            page_size: 10,
            page_number: 1,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results[0].make, "Ford");
    }

    #[test]
    fn finished_filter_selects_past_end_times() {
        let items = vec![item("Ford", "GT", 2), item("BMW", "M3", -1)];
        let params = SearchParams {
            filter: FilterKey::Finished,
            page_size: 10,
            page_number: 1,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results[0].make, "BMW");
    }

    #[test]
    fn make_sort_orders_by_make_then_model() {
        let items = vec![
            item("Ford", "Mustang", 2),
            item("Audi", "A4", 3),
            item("Ford", "GT", 4),
        ];
        let params = SearchParams {
            sort: SortKey::Make,
            page_size: 10,
            page_number: 1,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        let order: Vec<_> = page
            .results
            .iter()
            .map(|i| (i.make.as_str(), i.model.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("Audi", "A4"), ("Ford", "GT"), ("Ford", "Mustang")]
        );
    }

    #[test]
    fn search_term_matches_make_or_model_case_insensitively() {
        let items = vec![item("Ford", "GT", 2), item("Audi", "A4", 3)];
        let params = SearchParams {
            search_term: Some("ford".to_string()),
            page_size: 10,
            page_number: 1,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        assert_eq!(page.total_count, 1);
    }

    #[test]
    fn pagination_reports_counts_and_slices() {
        let items: Vec<_> = (0..5).map(|i| item("Ford", "GT", i + 1)).collect();
        let params = SearchParams {
            page_size: 2,
            page_number: 3,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        assert_eq!(page.total_count, 5);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.results.len(), 1);
    }

    #[test]
    fn winner_filter_matches_only_winning_bidder() {
        let mut won = item("Ford", "GT", -2);
        won.winner = Some("bob".to_string());
        won.status = AuctionStatus::Finished;
        let items = vec![won, item("Audi", "A4", -3)];

        let params = SearchParams {
            filter: FilterKey::Finished,
            winner: Some("bob".to_string()),
            page_size: 10,
            page_number: 1,
            ..SearchParams::default()
        };

        let page = search(&items, &params);
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results[0].winner.as_deref(), Some("bob"));
    }
}
