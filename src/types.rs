//! Domain types shared by pair selection, aggregation and the offline queue

use crate::error::InvalidPromotionWeight;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Moderation status of an item. Items are never deleted, only rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Approved => "approved",
            ItemStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "approved" => Some(ItemStatus::Approved),
            "rejected" => Some(ItemStatus::Rejected),
            _ => None,
        }
    }
}

pub const MIN_PROMOTION_WEIGHT: i64 = 1;
pub const MAX_PROMOTION_WEIGHT: i64 = 10;

/// Promotion weight, validated to 1..=10 at construction.
///
/// An item with weight `w` occupies `w` slots in the weighted candidate pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PromotionWeight(u8);

impl PromotionWeight {
    pub fn new(value: i64) -> Result<Self, InvalidPromotionWeight> {
        if (MIN_PROMOTION_WEIGHT..=MAX_PROMOTION_WEIGHT).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(InvalidPromotionWeight(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn slots(self) -> usize {
        self.0 as usize
    }
}

impl Default for PromotionWeight {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<i64> for PromotionWeight {
    type Error = InvalidPromotionWeight;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PromotionWeight> for i64 {
    fn from(weight: PromotionWeight) -> Self {
        weight.0 as i64
    }
}

/// A votable item as held by the item store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub status: ItemStatus,
    pub categories: BTreeSet<String>,
    pub promotion_weight: PromotionWeight,
    /// Cumulative appearances in a vote, across all time
    pub vote_count: u64,
    /// Cumulative wins, across all time
    pub win_count: u64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// New pending item with default weight and zeroed counters
    pub fn new<I, S>(id: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            status: ItemStatus::Pending,
            categories: categories.into_iter().map(Into::into).collect(),
            promotion_weight: PromotionWeight::default(),
            vote_count: 0,
            win_count: 0,
            title: None,
            url: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_weight(mut self, weight: PromotionWeight) -> Self {
        self.promotion_weight = weight;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn is_approved(&self) -> bool {
        self.status == ItemStatus::Approved
    }

    pub fn in_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// Payload accepted by the vote submission endpoint.
///
/// Fields default to empty so that a missing field is reported by
/// validation rather than by the JSON extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSubmission {
    #[serde(default)]
    pub winner_id: String,
    #[serde(default)]
    pub loser_id: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub session_id: String,
    /// Client-chosen id; a resubmission with the same id from the same
    /// voter is recognised as a duplicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_vote_id: Option<String>,
}

impl VoteSubmission {
    pub fn new(
        winner_id: impl Into<String>,
        loser_id: impl Into<String>,
        category: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            winner_id: winner_id.into(),
            loser_id: loser_id.into(),
            category: category.into(),
            session_id: session_id.into(),
            client_vote_id: None,
        }
    }

    pub fn with_client_vote_id(mut self, id: impl Into<String>) -> Self {
        self.client_vote_id = Some(id.into());
        self
    }

    pub fn pairing_key(&self) -> PairingKey {
        PairingKey::new(&self.winner_id, &self.loser_id)
    }
}

/// An accepted vote, immutable once appended to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    pub vote_id: String,
    pub voter_id: String,
    pub winner_id: String,
    pub loser_id: String,
    pub category: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// At most one vote per voter carries a given key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl VoteEvent {
    pub fn from_submission(
        vote_id: impl Into<String>,
        voter_id: impl Into<String>,
        submission: VoteSubmission,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            vote_id: vote_id.into(),
            voter_id: voter_id.into(),
            winner_id: submission.winner_id,
            loser_id: submission.loser_id,
            category: submission.category,
            session_id: submission.session_id,
            timestamp,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn pairing_key(&self) -> PairingKey {
        PairingKey::new(&self.winner_id, &self.loser_id)
    }
}

/// Unordered pair of item ids shown together
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairingKey {
    low: String,
    high: String,
}

impl PairingKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { low: a.to_string(), high: b.to_string() }
        } else {
            Self { low: b.to_string(), high: a.to_string() }
        }
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.low == item_id || self.high == item_id
    }
}

impl fmt::Display for PairingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_key_is_unordered() {
        assert_eq!(PairingKey::new("b", "a"), PairingKey::new("a", "b"));
        assert_eq!(PairingKey::new("b", "a").to_string(), "a|b");
    }

    #[test]
    fn test_promotion_weight_bounds() {
        assert!(PromotionWeight::new(0).is_err());
        assert!(PromotionWeight::new(11).is_err());
        assert_eq!(PromotionWeight::new(1).unwrap().get(), 1);
        assert_eq!(PromotionWeight::new(10).unwrap().slots(), 10);
        assert_eq!(PromotionWeight::default().get(), 1);
    }

    #[test]
    fn test_promotion_weight_rejected_on_deserialize() {
        let parsed: Result<PromotionWeight, _> = serde_json::from_str("42");
        assert!(parsed.is_err());

        let parsed: PromotionWeight = serde_json::from_str("7").unwrap();
        assert_eq!(parsed.get(), 7);
    }

    #[test]
    fn test_missing_submission_fields_default_to_empty() {
        let vote: VoteSubmission = serde_json::from_str(r#"{"winnerId":"a"}"#).unwrap();
        assert_eq!(vote.winner_id, "a");
        assert!(vote.loser_id.is_empty());
        assert!(vote.session_id.is_empty());
        assert_eq!(vote.client_vote_id, None);
    }

    #[test]
    fn test_client_vote_id_round_trips_in_camel_case() {
        let vote = VoteSubmission::new("a", "b", "x", "s").with_client_vote_id("offline_1");
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["clientVoteId"], "offline_1");

        let plain = serde_json::to_value(VoteSubmission::new("a", "b", "x", "s")).unwrap();
        assert!(plain.get("clientVoteId").is_none());
    }
}
