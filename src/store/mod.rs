//! Storage seams for items, the vote ledger and period aggregates
//!
//! Each store is a trait so the selector, processor and reader can run
//! against SQLite in production and against fakes in tests.
//!
//! Tables (see `/sql/`):
//! - `items`, `item_categories` - item store
//! - `votes` - append-only ledger
//! - `aggregates` - per-period counters, UPSERT on (subject, period, bucket)

pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::aggregation::bucket::Period;
use crate::error::StoreError;
use crate::types::{Item, PromotionWeight, VoteEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Approved items, optionally restricted to one category
    async fn list_approved(&self, category: Option<&str>) -> Result<Vec<Item>, StoreError>;

    async fn get_item(&self, item_id: &str) -> Result<Option<Item>, StoreError>;

    /// Items for the given ids; unknown ids are skipped
    async fn get_items(&self, item_ids: &[String]) -> Result<Vec<Item>, StoreError>;

    /// Insert a new item or replace its status, weight and detail fields.
    /// Vote counters are never overwritten.
    async fn upsert_item(&self, item: &Item) -> Result<(), StoreError>;

    async fn set_promotion_weight(
        &self,
        item_id: &str,
        weight: PromotionWeight,
        promoted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Bump the cumulative counters: winner gets a vote and a win,
    /// loser gets a vote
    async fn record_outcome(&self, winner_id: &str, loser_id: &str) -> Result<(), StoreError>;
}

/// Result of appending to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The voter already has a vote under this event's idempotency key
    Duplicate { vote_id: String },
}

#[async_trait]
pub trait VoteLedger: Send + Sync {
    /// Append an event. Never stores a second vote for the same voter and
    /// idempotency key.
    async fn append(&self, event: &VoteEvent) -> Result<AppendOutcome, StoreError>;

    /// Most recent votes by `voter_id`, newest first
    async fn recent_votes_for_voter(
        &self,
        voter_id: &str,
        limit: usize,
    ) -> Result<Vec<VoteEvent>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Item,
    Category,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Item => "item",
            SubjectType::Category => "category",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "item" => Some(SubjectType::Item),
            "category" => Some(SubjectType::Category),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one subject in one period bucket.
///
/// `win_rate` is always `win_count / vote_count` as persisted. Category
/// records carry no wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecord {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub period: Period,
    pub period_bucket: String,
    pub vote_count: u64,
    pub win_count: u64,
    pub win_rate: f64,
    pub last_updated: DateTime<Utc>,
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Atomically add one appearance to an item's record, plus one win if
    /// `won`, and recompute its win rate. Creates the record on first use.
    async fn increment_item(
        &self,
        period: Period,
        bucket: &str,
        item_id: &str,
        won: bool,
        at: DateTime<Utc>,
    ) -> Result<AggregateRecord, StoreError>;

    /// Atomically add one vote to a category's record
    async fn increment_category(
        &self,
        period: Period,
        bucket: &str,
        category: &str,
        at: DateTime<Utc>,
    ) -> Result<AggregateRecord, StoreError>;

    async fn get_record(
        &self,
        subject_type: SubjectType,
        period: Period,
        bucket: &str,
        subject_id: &str,
    ) -> Result<Option<AggregateRecord>, StoreError>;

    /// Every item record in one bucket, unordered
    async fn item_records(
        &self,
        period: Period,
        bucket: &str,
    ) -> Result<Vec<AggregateRecord>, StoreError>;
}
