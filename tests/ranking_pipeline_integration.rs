//! End-to-end flow on a file-backed database:
//! select pair -> submit vote -> aggregate -> leaderboard
//!
//! Key integration points tested:
//! - Session tokens issued by the selector are accepted by the vote service
//! - Every accepted vote lands in all five period buckets
//! - Cumulative item counters track the ledger
//! - State survives reopening the database

#[cfg(test)]
mod ranking_pipeline_tests {
    use chrono::{DateTime, TimeZone, Utc};
    use pairrank::aggregation::{AggregationProcessor, Period};
    use pairrank::leaderboard::{LeaderboardQuery, LeaderboardReader};
    use pairrank::selection::{DedupPolicy, PairSelector, SessionSigner};
    use pairrank::service::VoteService;
    use pairrank::store::{AggregateStore, ItemStore, SqliteStore, SubjectType, VoteLedger};
    use pairrank::types::{Item, ItemStatus, PromotionWeight, VoteSubmission};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 15, 30, 0).unwrap()
    }

    async fn seed(store: &SqliteStore) {
        let items = [
            ("sunset", "landscape", 1),
            ("glacier", "landscape", 3),
            ("dunes", "landscape", 1),
            ("fox", "animals", 2),
        ];
        for (id, category, weight) in items {
            let item = Item::new(id, [category])
                .with_status(ItemStatus::Approved)
                .with_weight(PromotionWeight::new(weight).unwrap());
            store.upsert_item(&item).await.unwrap();
        }
    }

    fn service(store: &Arc<SqliteStore>) -> VoteService {
        let processor = Arc::new(
            AggregationProcessor::new(store.clone()).with_item_counters(store.clone()),
        );
        VoteService::new_with_timestamp_fn(store.clone(), processor, Box::new(fixed_now))
    }

    #[tokio::test]
    async fn test_select_vote_rank_round_trip() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("ranking.db");
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        seed(&store).await;

        // 1. Each voter is served landscape pairs and always picks the
        //    alphabetically-first item
        let signer = Arc::new(SessionSigner::new("pipeline-secret"));
        let selector = PairSelector::new(store.clone(), store.clone())
            .with_dedup_policy(DedupPolicy {
                max_attempts: 1_000,
                accept_on_exhaustion: true,
            })
            .with_session_signer(signer.clone())
            .with_seed(17);
        let votes = service(&store)
            .with_session_signer(signer)
            .with_opaque_sessions(false);

        let mut cast = 0;
        for voter in ["alice", "bob", "carol"] {
            for _ in 0..3 {
                let pair = selector.select_pair(Some("landscape"), voter).await.unwrap();
                assert_ne!(pair.first.id, pair.second.id);
                assert!(pair.novel);

                let (winner, loser) = if pair.first.id < pair.second.id {
                    (&pair.first.id, &pair.second.id)
                } else {
                    (&pair.second.id, &pair.first.id)
                };
                let submission = VoteSubmission::new(
                    winner.as_str(),
                    loser.as_str(),
                    "landscape",
                    pair.session_token.as_str(),
                );
                let receipt = votes.submit(voter, submission).await.unwrap();
                assert!(receipt.aggregated);
                cast += 1;
            }
        }

        // 2. Ledger and category totals agree with what was cast
        assert_eq!(store.count().await.unwrap(), cast);
        for period in Period::all() {
            let bucket = period.bucket_key(fixed_now());
            let category = store
                .get_record(SubjectType::Category, period, &bucket, "landscape")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(category.vote_count, cast);
        }

        // 3. Three items means three distinct pairs, so each voter saw each
        //    pairing exactly once and "dunes" won every time it appeared
        let reader =
            LeaderboardReader::new_with_timestamp_fn(store.clone(), store.clone(), Box::new(fixed_now));
        let entries = reader
            .get_leaderboard(Period::Week, Some("landscape"), None)
            .await
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.item.id.as_str()).collect();
        assert_eq!(ids, ["dunes", "glacier", "sunset"]);
        assert_eq!(entries[0].win_rate, 1.0);
        assert_eq!(entries[2].win_rate, 0.0);

        for entry in &entries {
            assert_eq!(entry.win_rate, entry.win_count as f64 / entry.vote_count as f64);
        }

        // 4. Cumulative counters on the item rows match the period totals
        let dunes = store.get_item("dunes").await.unwrap().unwrap();
        assert_eq!(dunes.vote_count, entries[0].vote_count);
        assert_eq!(dunes.win_count, entries[0].win_count);

        // 5. Everything is still there after reopening
        drop(selector);
        drop(votes);
        drop(reader);
        drop(store);

        let reopened = Arc::new(SqliteStore::open(&db_path).unwrap());
        assert_eq!(reopened.count().await.unwrap(), cast);
        let reader = LeaderboardReader::new_with_timestamp_fn(
            reopened.clone(),
            reopened.clone(),
            Box::new(fixed_now),
        );
        let page = reader
            .get_page(&LeaderboardQuery::new(Period::All).with_category("landscape"))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_other_category_day_board_is_empty() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store).await;

        service(&store)
            .submit("alice", VoteSubmission::new("sunset", "glacier", "landscape", "s"))
            .await
            .unwrap();

        let reader =
            LeaderboardReader::new_with_timestamp_fn(store.clone(), store.clone(), Box::new(fixed_now));
        let portrait = reader
            .get_leaderboard(Period::Day, Some("portrait"), Some(10))
            .await
            .unwrap();
        assert!(portrait.is_empty());

        let landscape = reader
            .get_leaderboard(Period::Day, Some("landscape"), Some(10))
            .await
            .unwrap();
        assert_eq!(landscape.len(), 2);
    }

    #[tokio::test]
    async fn test_promotion_shifts_selection_frequency() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store).await;

        pairrank::promotion::set_promotion_weight(store.as_ref(), "sunset", 10, Utc::now())
            .await
            .unwrap();

        // landscape weights are now sunset 10, glacier 3, dunes 1
        let selector = PairSelector::new(store.clone(), store.clone()).with_seed(99);
        let rounds = 3_000;
        let mut sunset_first = 0;
        for _ in 0..rounds {
            let pair = selector.select_pair(Some("landscape"), "nobody").await.unwrap();
            if pair.first.id == "sunset" {
                sunset_first += 1;
            }
        }

        let share = sunset_first as f64 / rounds as f64;
        assert!((share - 10.0 / 14.0).abs() < 0.04, "sunset share {share}");
    }
}
