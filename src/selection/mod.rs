//! Pair Selector - draws two distinct approved items for a voter
//!
//! Selection steps:
//! 1. Load approved candidates (optionally one category)
//! 2. Build a weighted pool, one slot per unit of promotion weight
//! 3. Load the voter's recent pairings from the ledger
//! 4. Draw until the pair is novel or the dedup policy runs out
//! 5. Apply the placement policy and issue a session token

pub mod policy;
pub mod pool;
pub mod session;

pub use policy::{DedupPolicy, PlacementPolicy};
pub use pool::WeightedPool;
pub use session::{SessionCheck, SessionSigner, SessionToken};

use crate::error::StoreError;
use crate::store::{ItemStore, VoteLedger};
use crate::types::{Item, PairingKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("need at least 2 approved items{}, found {}", category_suffix(.category), .available)]
    InsufficientCandidates {
        category: Option<String>,
        available: usize,
    },

    #[error("no unseen pair found after {attempts} attempts")]
    NoNovelPair { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn category_suffix(category: &Option<String>) -> String {
    match category {
        Some(category) => format!(" in category {category}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedPair {
    pub first: Item,
    pub second: Item,
    pub session_token: SessionToken,
    /// Draws used, including the accepted one
    pub attempts: u32,
    /// False when the dedup policy gave up and served a repeat
    pub novel: bool,
}

impl SelectedPair {
    pub fn pairing_key(&self) -> PairingKey {
        PairingKey::new(&self.first.id, &self.second.id)
    }
}

/// Result of drawing from a pool against a set of seen pairings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub first: usize,
    pub second: usize,
    pub attempts: u32,
    pub novel: bool,
}

/// Draw pairs until one is not in `seen`. Returns None only when the
/// policy is strict and every attempt hit a seen pairing.
pub fn draw_pair<R: Rng + ?Sized>(
    pool: &WeightedPool,
    seen: &HashSet<PairingKey>,
    policy: &DedupPolicy,
    rng: &mut R,
) -> Option<Draw> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last = (0, 0);

    for attempt in 1..=max_attempts {
        let (first, second) = pool.draw_distinct(rng);
        let key = PairingKey::new(&pool.item(first).id, &pool.item(second).id);

        if !seen.contains(&key) {
            return Some(Draw {
                first,
                second,
                attempts: attempt,
                novel: true,
            });
        }
        last = (first, second);
    }

    if policy.accept_on_exhaustion {
        Some(Draw {
            first: last.0,
            second: last.1,
            attempts: max_attempts,
            novel: false,
        })
    } else {
        None
    }
}

pub struct PairSelector {
    items: Arc<dyn ItemStore>,
    ledger: Arc<dyn VoteLedger>,
    dedup: DedupPolicy,
    placement: PlacementPolicy,
    history_limit: usize,
    signer: Arc<SessionSigner>,
    rng: Mutex<StdRng>,
}

impl PairSelector {
    pub fn new(items: Arc<dyn ItemStore>, ledger: Arc<dyn VoteLedger>) -> Self {
        Self {
            items,
            ledger,
            dedup: DedupPolicy::default(),
            placement: PlacementPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            signer: Arc::new(SessionSigner::random()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_dedup_policy(mut self, dedup: DedupPolicy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Share the signer the vote service verifies with
    pub fn with_session_signer(mut self, signer: Arc<SessionSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Deterministic draws, for tests
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub async fn select_pair(
        &self,
        category: Option<&str>,
        voter_id: &str,
    ) -> Result<SelectedPair, SelectionError> {
        let candidates = self.items.list_approved(category).await?;
        let pool = WeightedPool::new(candidates);

        if pool.distinct_items() < 2 {
            return Err(SelectionError::InsufficientCandidates {
                category: category.map(str::to_string),
                available: pool.distinct_items(),
            });
        }

        let seen: HashSet<PairingKey> = self
            .ledger
            .recent_votes_for_voter(voter_id, self.history_limit)
            .await?
            .iter()
            .map(|vote| vote.pairing_key())
            .collect();

        let draw = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            draw_pair(&pool, &seen, &self.dedup, &mut *rng)
        };

        let Some(draw) = draw else {
            log::warn!(
                "⚠️  No unseen pair for voter {} after {} attempts",
                voter_id,
                self.dedup.max_attempts
            );
            return Err(SelectionError::NoNovelPair {
                attempts: self.dedup.max_attempts,
            });
        };

        if !draw.novel {
            log::debug!(
                "Serving repeat pair to voter {} after {} attempts",
                voter_id,
                draw.attempts
            );
        }

        let (first, second) = self.placement.place(
            pool.item(draw.first).clone(),
            pool.item(draw.second).clone(),
        );
        let session_token = self.signer.issue(&PairingKey::new(&first.id, &second.id));

        Ok(SelectedPair {
            first,
            second,
            session_token,
            attempts: draw.attempts,
            novel: draw.novel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{ItemStatus, PromotionWeight, VoteEvent};
    use chrono::Utc;
    use std::collections::HashMap;

    async fn store_with(items: &[(&str, &str, i64)]) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for (id, category, weight) in items {
            let item = Item::new(*id, [*category])
                .with_status(ItemStatus::Approved)
                .with_weight(PromotionWeight::new(*weight).unwrap());
            store.upsert_item(&item).await.unwrap();
        }
        store
    }

    async fn seen_by(store: &SqliteStore, voter: &str, winner: &str, loser: &str) {
        let event = VoteEvent {
            vote_id: uuid::Uuid::new_v4().to_string(),
            voter_id: voter.to_string(),
            winner_id: winner.to_string(),
            loser_id: loser.to_string(),
            category: "x".to_string(),
            session_id: "s".to_string(),
            timestamp: Utc::now(),
            idempotency_key: None,
        };
        store.append(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_candidates() {
        let store = store_with(&[("a", "x", 1)]).await;
        let selector = PairSelector::new(store.clone(), store.clone());

        let err = selector.select_pair(None, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            SelectionError::InsufficientCandidates { available: 1, .. }
        ));

        let err = selector.select_pair(Some("portrait"), "alice").await.unwrap_err();
        assert!(matches!(
            err,
            SelectionError::InsufficientCandidates { available: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_pair_is_distinct_and_in_category() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 2), ("c", "y", 5)]).await;
        let selector = PairSelector::new(store.clone(), store.clone()).with_seed(1);

        for _ in 0..50 {
            let pair = selector.select_pair(Some("x"), "alice").await.unwrap();
            assert_ne!(pair.first.id, pair.second.id);
            assert!(pair.first.in_category("x") && pair.second.in_category("x"));
        }
    }

    #[tokio::test]
    async fn test_seen_pairs_are_avoided() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 1), ("c", "x", 1)]).await;
        seen_by(&store, "alice", "a", "b").await;
        seen_by(&store, "alice", "c", "a").await;

        let selector = PairSelector::new(store.clone(), store.clone()).with_seed(9);
        for _ in 0..20 {
            let pair = selector.select_pair(None, "alice").await.unwrap();
            assert!(pair.novel);
            assert_eq!(pair.pairing_key(), PairingKey::new("b", "c"));
        }
    }

    #[tokio::test]
    async fn test_exhausted_history_serves_repeat_by_default() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 1)]).await;
        seen_by(&store, "alice", "a", "b").await;

        let selector = PairSelector::new(store.clone(), store.clone()).with_seed(3);
        let pair = selector.select_pair(None, "alice").await.unwrap();

        assert!(!pair.novel);
        assert_eq!(pair.attempts, 50);
    }

    #[tokio::test]
    async fn test_strict_policy_reports_no_novel_pair() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 1)]).await;
        seen_by(&store, "alice", "a", "b").await;

        let selector = PairSelector::new(store.clone(), store.clone())
            .with_dedup_policy(DedupPolicy::strict(10));
        let err = selector.select_pair(None, "alice").await.unwrap_err();
        assert!(matches!(err, SelectionError::NoNovelPair { attempts: 10 }));

        // another voter has not seen it
        assert!(selector.select_pair(None, "bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_history_limit_bounds_dedup_window() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 1), ("c", "x", 1)]).await;
        seen_by(&store, "alice", "a", "b").await;
        seen_by(&store, "alice", "b", "c").await;
        seen_by(&store, "alice", "a", "c").await;

        let selector = PairSelector::new(store.clone(), store.clone())
            .with_dedup_policy(DedupPolicy::strict(50))
            .with_history_limit(1)
            .with_seed(5);

        let pair = selector.select_pair(None, "alice").await.unwrap();
        assert_ne!(pair.pairing_key(), PairingKey::new("a", "c"));
    }

    #[tokio::test]
    async fn test_session_token_signed_for_served_pair() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 1), ("c", "x", 1)]).await;
        let signer = Arc::new(SessionSigner::new("secret"));
        let selector = PairSelector::new(store.clone(), store.clone())
            .with_session_signer(signer.clone())
            .with_seed(3);

        let pair = selector.select_pair(None, "alice").await.unwrap();
        assert_eq!(
            signer.check(pair.session_token.as_str(), &pair.pairing_key()),
            SessionCheck::Matches
        );
        assert_eq!(
            SessionSigner::new("other").check(pair.session_token.as_str(), &pair.pairing_key()),
            SessionCheck::Mismatch
        );
    }

    #[tokio::test]
    async fn test_promoted_first_placement() {
        let store = store_with(&[("a", "x", 1), ("b", "x", 10)]).await;
        let selector = PairSelector::new(store.clone(), store.clone())
            .with_placement(PlacementPolicy::PromotedFirst)
            .with_seed(11);

        for _ in 0..20 {
            let pair = selector.select_pair(None, "alice").await.unwrap();
            assert_eq!(pair.first.id, "b");
        }
    }

    #[tokio::test]
    async fn test_selection_frequency_is_weight_proportional() {
        // expected inclusion share: w_i / W for the first slot
        let store = store_with(&[("a", "x", 1), ("b", "x", 2), ("c", "x", 7)]).await;
        let selector = PairSelector::new(store.clone(), store.clone()).with_seed(2024);

        let rounds = 5_000;
        let mut first_counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..rounds {
            let pair = selector.select_pair(None, "nobody").await.unwrap();
            *first_counts.entry(pair.first.id).or_default() += 1;
        }

        let share = |id: &str| first_counts.get(id).copied().unwrap_or(0) as f64 / rounds as f64;
        assert!((share("a") - 0.1).abs() < 0.03, "a share {}", share("a"));
        assert!((share("b") - 0.2).abs() < 0.03, "b share {}", share("b"));
        assert!((share("c") - 0.7).abs() < 0.03, "c share {}", share("c"));
    }
}
