//! Offline queue draining into a live vote service
//!
//! Key integration points tested:
//! - Votes queued while offline reach the ledger after reconnecting
//! - A vote rejected mid-pass stays pending and is not duplicated
//! - A vote whose response was lost is recognised upstream on retry
//! - A live submission drains anything still pending
//! - File-backed queue state survives a client restart

#[cfg(test)]
mod offline_sync_tests {
    use async_trait::async_trait;
    use pairrank::aggregation::AggregationProcessor;
    use pairrank::config::OfflineQueueConfig;
    use pairrank::offline::{
        ConnectivityState, FileKeyValueStore, MemoryKeyValueStore, OfflineQueueManager,
        SubmissionAck, SubmitError, VoteSubmitter,
    };
    use pairrank::service::{SubmissionError, VoteService};
    use pairrank::store::{SqliteStore, VoteLedger};
    use pairrank::types::VoteSubmission;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Hands queued votes straight to an in-process `VoteService`.
    /// Votes whose winner is in `outage_for` fail on their first attempt.
    /// Votes whose winner is in `lost_reply_for` reach the service once but
    /// the caller sees a transport error.
    struct InProcessSubmitter {
        service: VoteService,
        voter_id: String,
        outage_for: Mutex<HashSet<String>>,
        lost_reply_for: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl VoteSubmitter for InProcessSubmitter {
        async fn submit(&self, vote: &VoteSubmission) -> Result<SubmissionAck, SubmitError> {
            let outage = self.outage_for.lock().unwrap().remove(&vote.winner_id);
            if outage {
                return Err(SubmitError::Transport("connection reset".to_string()));
            }

            let result = self.service.submit(&self.voter_id, vote.clone()).await;
            if self.lost_reply_for.lock().unwrap().remove(&vote.winner_id) {
                return Err(SubmitError::Transport("response timed out".to_string()));
            }

            match result {
                Ok(receipt) => Ok(SubmissionAck {
                    vote_id: Some(receipt.vote_id),
                    duplicate: false,
                }),
                Err(SubmissionError::Duplicate { vote_id }) => Ok(SubmissionAck {
                    vote_id: Some(vote_id),
                    duplicate: true,
                }),
                Err(e) => Err(SubmitError::Rejected {
                    status: 400,
                    body: e.to_string(),
                }),
            }
        }
    }

    fn server() -> (Arc<SqliteStore>, VoteService) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let processor = Arc::new(AggregationProcessor::new(store.clone()));
        let service = VoteService::new(store.clone(), processor);
        (store, service)
    }

    fn submitter(service: VoteService, failing_winner: Option<&str>) -> Arc<InProcessSubmitter> {
        Arc::new(InProcessSubmitter {
            service,
            voter_id: "alice".to_string(),
            outage_for: Mutex::new(failing_winner.map(str::to_string).into_iter().collect()),
            lost_reply_for: Mutex::new(HashSet::new()),
        })
    }

    fn vote(winner: &str, loser: &str) -> VoteSubmission {
        VoteSubmission::new(winner, loser, "landscape", "session-1")
    }

    #[tokio::test]
    async fn test_three_offline_votes_second_fails_once() {
        let (store, service) = server();
        let manager = OfflineQueueManager::new(
            Arc::new(MemoryKeyValueStore::new()),
            submitter(service, Some("b")),
        );

        // 1. Go offline and queue three votes
        manager.on_connectivity_change(false).await;
        for (winner, loser) in [("a", "x"), ("b", "y"), ("c", "z")] {
            manager.submit_or_queue(vote(winner, loser)).await.unwrap();
        }
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 3);
        assert_eq!(store.count().await.unwrap(), 0);

        // 2. Reconnect: first and third go through, second fails
        let report = manager.on_connectivity_change(true).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.synced, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 1);
        assert_eq!(store.count().await.unwrap(), 2);

        // 3. Next pass drains the remainder
        let report = manager.sync_pending_votes().await.unwrap();
        assert_eq!((report.attempted, report.synced), (1, 1));

        let status = manager.get_sync_status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.state, ConnectivityState::Online);

        // 4. Exactly three votes in the ledger, no duplicates
        assert_eq!(store.count().await.unwrap(), 3);
        let winners: HashSet<String> = store
            .recent_votes_for_voter("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.winner_id)
            .collect();
        assert_eq!(winners.len(), 3);
    }

    #[tokio::test]
    async fn test_live_vote_after_partial_sync_drains_queue() {
        let (store, service) = server();
        let manager = OfflineQueueManager::new(
            Arc::new(MemoryKeyValueStore::new()),
            submitter(service, Some("b")),
        );

        manager.on_connectivity_change(false).await;
        for (winner, loser) in [("a", "x"), ("b", "y"), ("c", "z")] {
            manager.submit_or_queue(vote(winner, loser)).await.unwrap();
        }
        manager.on_connectivity_change(true).await.unwrap();
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 1);

        // no further connectivity event: the next vote carries the backlog
        manager.submit_or_queue(vote("d", "w")).await.unwrap();

        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 0);
        assert_eq!(store.count().await.unwrap(), 4);
        assert!(manager.on_connectivity_change(true).await.is_none());
    }

    #[tokio::test]
    async fn test_lost_response_is_not_counted_twice() {
        let (store, service) = server();
        let submitter = submitter(service, None);
        submitter.lost_reply_for.lock().unwrap().insert("a".to_string());
        let manager =
            OfflineQueueManager::new(Arc::new(MemoryKeyValueStore::new()), submitter.clone());

        manager.on_connectivity_change(false).await;
        manager.record_vote(vote("a", "b")).await.unwrap();

        // 1. Upstream records the vote but the client never hears back
        let report = manager.on_connectivity_change(true).await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 1);

        // 2. The retry is recognised and the record is settled
        let report = manager.sync_pending_votes().await.unwrap();
        assert_eq!((report.attempted, report.synced), (1, 1));
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_survives_client_restart() {
        let dir = TempDir::new().unwrap();

        // 1. First client session queues two votes and "crashes"
        {
            let (_, service) = server();
            let manager = OfflineQueueManager::new(
                Arc::new(FileKeyValueStore::new(dir.path()).unwrap()),
                submitter(service, None),
            );
            manager.on_connectivity_change(false).await;
            manager.record_vote(vote("a", "b")).await.unwrap();
            manager.record_vote(vote("c", "d")).await.unwrap();
        }

        // 2. Restarted client finds them pending and syncs
        let (store, service) = server();
        let manager = OfflineQueueManager::new(
            Arc::new(FileKeyValueStore::new(dir.path()).unwrap()),
            submitter(service, None),
        );
        assert_eq!(manager.get_sync_status().await.unwrap().pending_count, 2);

        let report = manager.sync_pending_votes().await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let status = manager.get_sync_status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert!(status.last_sync.is_some());
    }

    #[tokio::test]
    async fn test_manager_from_config_uses_storage_dir() {
        let dir = TempDir::new().unwrap();
        let config = OfflineQueueConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            voter_id: "alice".to_string(),
            storage_dir: dir.path().join("queue"),
        };

        let manager = OfflineQueueManager::from_config(&config).unwrap();
        manager.on_connectivity_change(false).await;
        manager.record_vote(vote("a", "b")).await.unwrap();

        assert!(dir.path().join("queue").join("offline_votes.json").exists());
    }
}
