//! Leaderboard Reader - ranked items for the current bucket of a period
//!
//! Ordering: win rate descending, then vote count descending, then item id
//! ascending so equal records always come back in the same order.
//! Records whose item is gone, not approved, or outside the requested
//! category are left out before paging.

use crate::aggregation::bucket::Period;
use crate::error::StoreError;
use crate::store::{AggregateRecord, AggregateStore, ItemStore};
use crate::types::Item;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("limit must be between 1 and 100, got {0}")]
    InvalidLimit(usize),

    #[error("unknown period {0:?}, expected day, week, month, year or all")]
    UnknownPeriod(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardQuery {
    pub period: Period,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Parse a period name as given on the query string
pub fn parse_period(raw: &str) -> Result<Period, LeaderboardError> {
    Period::from_str(raw).ok_or_else(|| LeaderboardError::UnknownPeriod(raw.to_string()))
}

impl LeaderboardQuery {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            category: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position across the whole leaderboard, not just this page
    pub rank: usize,
    pub item: Item,
    pub vote_count: u64,
    pub win_count: u64,
    pub win_rate: f64,
    pub period: Period,
    pub period_bucket: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    pub period: Period,
    pub period_bucket: String,
    pub category: Option<String>,
    pub entries: Vec<LeaderboardEntry>,
    pub total: usize,
    pub next_offset: Option<usize>,
}

impl LeaderboardPage {
    /// `Cache-Control` value for serving this page
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.period.cache_max_age_secs())
    }
}

/// Leaderboard order for two item records
pub fn compare_records(a: &AggregateRecord, b: &AggregateRecord) -> Ordering {
    b.win_rate
        .total_cmp(&a.win_rate)
        .then_with(|| b.vote_count.cmp(&a.vote_count))
        .then_with(|| a.subject_id.cmp(&b.subject_id))
}

pub fn rank_records(mut records: Vec<AggregateRecord>) -> Vec<AggregateRecord> {
    records.sort_by(compare_records);
    records
}

pub struct LeaderboardReader {
    aggregates: Arc<dyn AggregateStore>,
    items: Arc<dyn ItemStore>,
    default_limit: usize,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl LeaderboardReader {
    pub fn new(aggregates: Arc<dyn AggregateStore>, items: Arc<dyn ItemStore>) -> Self {
        Self::new_with_timestamp_fn(aggregates, items, Box::new(Utc::now))
    }

    pub fn new_with_timestamp_fn(
        aggregates: Arc<dyn AggregateStore>,
        items: Arc<dyn ItemStore>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            aggregates,
            items,
            default_limit: DEFAULT_LIMIT,
            now_fn,
        }
    }

    /// Limit used when a query does not give one; clamped to 1..=100
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub async fn get_leaderboard(
        &self,
        period: Period,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<LeaderboardEntry>, LeaderboardError> {
        let query = LeaderboardQuery {
            period,
            category: category.map(str::to_string),
            limit,
            offset: 0,
        };
        Ok(self.get_page(&query).await?.entries)
    }

    pub async fn get_page(
        &self,
        query: &LeaderboardQuery,
    ) -> Result<LeaderboardPage, LeaderboardError> {
        let limit = query.limit.unwrap_or(self.default_limit);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(LeaderboardError::InvalidLimit(limit));
        }

        let bucket = query.period.bucket_key((self.now_fn)());
        let records = self.aggregates.item_records(query.period, &bucket).await?;

        let ids: Vec<String> = records.iter().map(|r| r.subject_id.clone()).collect();
        let mut items: HashMap<String, Item> = self
            .items
            .get_items(&ids)
            .await?
            .into_iter()
            .filter(|item| item.is_approved())
            .filter(|item| match &query.category {
                Some(category) => item.in_category(category),
                None => true,
            })
            .map(|item| (item.id.clone(), item))
            .collect();

        let ranked = rank_records(
            records
                .into_iter()
                .filter(|r| items.contains_key(&r.subject_id))
                .collect(),
        );
        let total = ranked.len();

        let entries: Vec<LeaderboardEntry> = ranked
            .into_iter()
            .enumerate()
            .skip(query.offset)
            .take(limit)
            .filter_map(|(idx, record)| {
                let item = items.remove(&record.subject_id)?;
                Some(LeaderboardEntry {
                    rank: idx + 1,
                    item,
                    vote_count: record.vote_count,
                    win_count: record.win_count,
                    win_rate: record.win_rate,
                    period: record.period,
                    period_bucket: record.period_bucket,
                })
            })
            .collect();

        let end = query.offset.saturating_add(limit);
        let next_offset = (end < total).then_some(end);

        log::debug!(
            "Leaderboard {}/{} category={:?}: {} of {} entries",
            query.period,
            bucket,
            query.category,
            entries.len(),
            total
        );

        Ok(LeaderboardPage {
            period: query.period,
            period_bucket: bucket,
            category: query.category.clone(),
            entries,
            total,
            next_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::AggregationProcessor;
    use crate::store::{SqliteStore, SubjectType};
    use crate::types::{ItemStatus, VoteEvent};
    use chrono::TimeZone;

    fn record(id: &str, win_rate: f64, vote_count: u64) -> AggregateRecord {
        AggregateRecord {
            subject_type: SubjectType::Item,
            subject_id: id.to_string(),
            period: Period::All,
            period_bucket: "all-time".to_string(),
            vote_count,
            win_count: (win_rate * vote_count as f64).round() as u64,
            win_rate,
            last_updated: Utc::now(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 15, 30, 0).unwrap()
    }

    async fn seeded_store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for (id, category) in [("a", "landscape"), ("b", "landscape"), ("c", "landscape"), ("d", "animals")] {
            let item = Item::new(id, [category]).with_status(ItemStatus::Approved);
            store.upsert_item(&item).await.unwrap();
        }
        store
    }

    async fn cast(store: &Arc<SqliteStore>, id: &str, winner: &str, loser: &str, category: &str) {
        let processor = AggregationProcessor::new(store.clone());
        let event = VoteEvent {
            vote_id: id.to_string(),
            voter_id: "alice".to_string(),
            winner_id: winner.to_string(),
            loser_id: loser.to_string(),
            category: category.to_string(),
            session_id: "s".to_string(),
            timestamp: now(),
            idempotency_key: None,
        };
        assert!(processor.on_vote(&event).await.is_complete());
    }

    fn reader(store: &Arc<SqliteStore>) -> LeaderboardReader {
        LeaderboardReader::new_with_timestamp_fn(store.clone(), store.clone(), Box::new(now))
    }

    #[test]
    fn test_ordering_by_rate_then_votes() {
        let ranked = rank_records(vec![
            record("A", 0.80, 50),
            record("B", 0.80, 30),
            record("C", 0.90, 5),
        ]);
        let ids: Vec<_> = ranked.iter().map(|r| r.subject_id.as_str()).collect();
        assert_eq!(ids, ["C", "A", "B"]);
    }

    #[test]
    fn test_full_ties_break_on_id() {
        let ranked = rank_records(vec![record("z", 0.5, 10), record("m", 0.5, 10)]);
        assert_eq!(ranked[0].subject_id, "m");
    }

    #[tokio::test]
    async fn test_empty_bucket_returns_empty_list() {
        let store = seeded_store().await;
        cast(&store, "v1", "a", "b", "landscape").await;

        let entries = reader(&store)
            .get_leaderboard(Period::Day, Some("portrait"), Some(10))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_category_filter_and_ranks() {
        let store = seeded_store().await;
        cast(&store, "v1", "a", "b", "landscape").await;
        cast(&store, "v2", "a", "c", "landscape").await;
        cast(&store, "v3", "c", "b", "landscape").await;
        cast(&store, "v4", "d", "a", "animals").await;

        let entries = reader(&store)
            .get_leaderboard(Period::Week, Some("landscape"), None)
            .await
            .unwrap();

        let ids: Vec<_> = entries.iter().map(|e| e.item.id.as_str()).collect();
        // a: 2/3, c: 1/2, b: 0/2
        assert_eq!(ids, ["a", "c", "b"]);
        assert_eq!(entries[0].rank, 1);
        assert_eq!((entries[0].vote_count, entries[0].win_count), (3, 2));
        assert_eq!(entries[0].win_rate, 2.0 / 3.0);
    }

    #[tokio::test]
    async fn test_entries_name_their_period_bucket() {
        let store = seeded_store().await;
        cast(&store, "v1", "a", "b", "landscape").await;

        let entries = reader(&store)
            .get_leaderboard(Period::Week, None, None)
            .await
            .unwrap();
        assert!(entries
            .iter()
            .all(|e| e.period == Period::Week && e.period_bucket == "2024-03-10"));

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["period"], "week");
        assert_eq!(json["periodBucket"], "2024-03-10");
    }

    #[tokio::test]
    async fn test_paging_keeps_global_rank() {
        let store = seeded_store().await;
        cast(&store, "v1", "a", "b", "landscape").await;
        cast(&store, "v2", "c", "d", "landscape").await;

        let reader = reader(&store);
        let first = reader
            .get_page(&LeaderboardQuery::new(Period::All).with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.total, 4);
        assert_eq!(first.next_offset, Some(2));
        assert_eq!(first.period_bucket, "all-time");

        let second = reader
            .get_page(&LeaderboardQuery::new(Period::All).with_limit(2).with_offset(2))
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 2);
        assert_eq!(second.entries[0].rank, 3);
        assert_eq!(second.next_offset, None);
    }

    #[tokio::test]
    async fn test_rejected_items_are_hidden() {
        let store = seeded_store().await;
        cast(&store, "v1", "a", "b", "landscape").await;
        store
            .upsert_item(&Item::new("a", ["landscape"]).with_status(ItemStatus::Rejected))
            .await
            .unwrap();

        let entries = reader(&store)
            .get_leaderboard(Period::Day, None, None)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item.id, "b");
    }

    #[tokio::test]
    async fn test_limit_out_of_range() {
        let store = seeded_store().await;
        let reader = reader(&store);

        for limit in [0, 101] {
            let err = reader
                .get_leaderboard(Period::All, None, Some(limit))
                .await
                .unwrap_err();
            assert!(matches!(err, LeaderboardError::InvalidLimit(l) if l == limit));
        }
        assert!(reader.get_leaderboard(Period::All, None, Some(100)).await.is_ok());
    }

    #[test]
    fn test_parse_period() {
        assert_eq!(parse_period("week").unwrap(), Period::Week);
        assert!(matches!(
            parse_period("decade"),
            Err(LeaderboardError::UnknownPeriod(p)) if p == "decade"
        ));
    }

    #[test]
    fn test_cache_control_follows_period() {
        let page = LeaderboardPage {
            period: Period::Day,
            period_bucket: "2024-03-13".to_string(),
            category: None,
            entries: Vec::new(),
            total: 0,
            next_offset: None,
        };
        assert_eq!(page.cache_control(), "public, max-age=300");
    }
}
