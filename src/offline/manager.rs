//! Offline Queue Manager - durable client-side vote queue with resync
//!
//! ## State machine
//!
//! ```text
//! Online --connection lost--> Offline --connection restored--> Syncing
//! Syncing --pass finished--> Online (still connected) | Offline
//! ```
//!
//! - Only one sync pass runs at a time. A restore event seen while a pass
//!   is running is folded into that pass. Votes queued during a pass are
//!   left to a follow-up pass that starts as soon as it finishes.
//! - A record is marked synced durably right after upstream accepts it, so
//!   an interrupted pass never resubmits accepted votes.
//! - Every vote carries its `local_id` as the client vote id, so upstream
//!   recognises a resubmission whose first response was lost.
//! - A rejected submission leaves its record pending. It is retried on the
//!   next restore, the next "online" report, or the next live submission
//!   that succeeds.
//! - Synced records are kept as an audit trail until `clear_offline_data`.

use super::storage::{FileKeyValueStore, KeyValueStore, QueueError};
use super::submitter::{HttpVoteSubmitter, SubmissionAck, VoteSubmitter};
use crate::config::OfflineQueueConfig;
use crate::types::VoteSubmission;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub const OFFLINE_VOTES_KEY: &str = "offline_votes";
pub const SYNC_STATUS_KEY: &str = "sync_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
    Syncing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineVoteRecord {
    pub local_id: String,
    pub vote: VoteSubmission,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub is_online: bool,
    pub state: ConnectivityState,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSyncState {
    last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
#[error("offline vote {local_id} not synced: {reason}")]
pub struct SyncSubmissionFailure {
    pub local_id: String,
    pub reason: String,
}

/// Outcome of one sync pass
#[derive(Debug, Default)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failures: Vec<SyncSubmissionFailure>,
}

/// Follow-up owed after a connectivity change was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectivityAction {
    Nothing,
    RunPass,
    ResyncIfPending,
}

#[derive(Debug)]
pub enum VoteDisposition {
    Submitted(SubmissionAck),
    Queued(OfflineVoteRecord),
}

struct ConnectionState {
    state: ConnectivityState,
    /// Last connectivity reported, independent of any running pass
    connected: bool,
    subscribers: Vec<mpsc::UnboundedSender<SyncStatus>>,
}

pub struct OfflineQueueManager {
    storage: Arc<dyn KeyValueStore>,
    submitter: Arc<dyn VoteSubmitter>,

    /// Never held across an await
    connection: Mutex<ConnectionState>,

    /// Serialises read-modify-write of the records key
    records_lock: tokio::sync::Mutex<()>,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl OfflineQueueManager {
    pub fn new(storage: Arc<dyn KeyValueStore>, submitter: Arc<dyn VoteSubmitter>) -> Self {
        Self::new_with_timestamp_fn(storage, submitter, Box::new(Utc::now))
    }

    pub fn new_with_timestamp_fn(
        storage: Arc<dyn KeyValueStore>,
        submitter: Arc<dyn VoteSubmitter>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            storage,
            submitter,
            connection: Mutex::new(ConnectionState {
                state: ConnectivityState::Online,
                connected: true,
                subscribers: Vec::new(),
            }),
            records_lock: tokio::sync::Mutex::new(()),
            now_fn,
        }
    }

    /// File-backed storage plus an HTTP submitter for `config.endpoint`
    pub fn from_config(config: &OfflineQueueConfig) -> Result<Self, QueueError> {
        let storage = FileKeyValueStore::new(&config.storage_dir)?;
        let submitter = HttpVoteSubmitter::new(&config.endpoint, config.voter_id.clone())
            .map_err(|e| QueueError::Client(e.to_string()))?;

        Ok(Self::new(Arc::new(storage), Arc::new(submitter)))
    }

    pub fn state(&self) -> ConnectivityState {
        self.connection().state
    }

    fn connection(&self) -> MutexGuard<'_, ConnectionState> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load_records(&self) -> Result<Vec<OfflineVoteRecord>, QueueError> {
        match self.storage.load(OFFLINE_VOTES_KEY).await? {
            Some(json) => serde_json::from_str(&json).map_err(|source| QueueError::Corrupt {
                key: OFFLINE_VOTES_KEY.to_string(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn save_records(&self, records: &[OfflineVoteRecord]) -> Result<(), QueueError> {
        let json =
            serde_json::to_string(records).map_err(|e| QueueError::Storage(e.to_string()))?;
        self.storage.save(OFFLINE_VOTES_KEY, &json).await
    }

    async fn load_sync_state(&self) -> Result<PersistedSyncState, QueueError> {
        match self.storage.load(SYNC_STATUS_KEY).await? {
            Some(json) => serde_json::from_str(&json).map_err(|source| QueueError::Corrupt {
                key: SYNC_STATUS_KEY.to_string(),
                source,
            }),
            None => Ok(PersistedSyncState::default()),
        }
    }

    async fn save_sync_state(&self, state: &PersistedSyncState) -> Result<(), QueueError> {
        let json = serde_json::to_string(state).map_err(|e| QueueError::Storage(e.to_string()))?;
        self.storage.save(SYNC_STATUS_KEY, &json).await
    }

    /// Every stored record, synced ones included
    pub async fn records(&self) -> Result<Vec<OfflineVoteRecord>, QueueError> {
        self.load_records().await
    }

    async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.load_records().await?.iter().filter(|r| !r.synced).count())
    }

    /// Persist a vote for later submission
    pub async fn record_vote(
        &self,
        mut vote: VoteSubmission,
    ) -> Result<OfflineVoteRecord, QueueError> {
        let local_id = vote.client_vote_id.get_or_insert_with(new_local_id).clone();
        let record = OfflineVoteRecord {
            local_id,
            vote,
            created_at: (self.now_fn)(),
            synced: false,
            synced_at: None,
        };

        {
            let _guard = self.records_lock.lock().await;
            let mut records = self.load_records().await?;
            records.push(record.clone());
            self.save_records(&records).await?;
        }

        log::info!("📥 Queued offline vote {}", record.local_id);
        self.notify_subscribers().await;
        Ok(record)
    }

    /// Submit directly when online, otherwise (or on failure) queue.
    ///
    /// A live success proves upstream is reachable, so anything still
    /// pending is synced before returning.
    pub async fn submit_or_queue(
        &self,
        mut vote: VoteSubmission,
    ) -> Result<VoteDisposition, QueueError> {
        vote.client_vote_id.get_or_insert_with(new_local_id);

        if self.state() == ConnectivityState::Online {
            match self.submitter.submit(&vote).await {
                Ok(ack) => {
                    self.sync_if_pending().await;
                    return Ok(VoteDisposition::Submitted(ack));
                }
                Err(e) => log::warn!("⚠️  Live submission failed, queueing vote: {}", e),
            }
        }

        self.record_vote(vote).await.map(VoteDisposition::Queued)
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatus, QueueError> {
        let pending_count = self.pending_count().await?;
        let last_sync = self.load_sync_state().await?.last_sync;

        let connection = self.connection();
        Ok(SyncStatus {
            last_sync,
            pending_count,
            is_online: connection.connected,
            state: connection.state,
        })
    }

    /// Receive the current status now and again after every change
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<SyncStatus>, QueueError> {
        let status = self.get_sync_status().await?;
        let (tx, rx) = mpsc::unbounded_channel();

        if tx.send(status).is_ok() {
            self.connection().subscribers.push(tx);
        }
        Ok(rx)
    }

    async fn notify_subscribers(&self) {
        let status = match self.get_sync_status().await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("⚠️  Could not compute sync status: {}", e);
                return;
            }
        };

        // Dropped receivers fall out here
        self.connection()
            .subscribers
            .retain(|tx| tx.send(status.clone()).is_ok());
    }

    /// Feed a connectivity change in. Returns the report when this call
    /// ran a sync pass.
    pub async fn on_connectivity_change(&self, online: bool) -> Option<SyncReport> {
        let action = self.apply_connectivity(online);
        self.announce_connectivity(online).await;
        self.after_connectivity(action).await
    }

    /// State transition only; never awaits
    fn apply_connectivity(&self, online: bool) -> ConnectivityAction {
        let mut connection = self.connection();
        connection.connected = online;

        match (connection.state, online) {
            (ConnectivityState::Online, false) => {
                connection.state = ConnectivityState::Offline;
                ConnectivityAction::Nothing
            }
            (ConnectivityState::Offline, true) => {
                connection.state = ConnectivityState::Syncing;
                ConnectivityAction::RunPass
            }
            (ConnectivityState::Online, true) => ConnectivityAction::ResyncIfPending,
            _ => ConnectivityAction::Nothing,
        }
    }

    async fn announce_connectivity(&self, online: bool) {
        if online {
            log::info!("🌐 Connection restored");
        } else {
            log::info!("📴 Connection lost, votes will be queued");
        }
        self.notify_subscribers().await;
    }

    async fn after_connectivity(&self, action: ConnectivityAction) -> Option<SyncReport> {
        match action {
            ConnectivityAction::Nothing => None,
            ConnectivityAction::RunPass => Some(self.run_sync_pass().await),
            ConnectivityAction::ResyncIfPending => self.sync_if_pending().await,
        }
    }

    /// Run a sync pass if anything is pending and we are online
    pub async fn sync_if_pending(&self) -> Option<SyncReport> {
        match self.pending_count().await {
            Ok(0) => None,
            Ok(_) => self.sync_pending_votes().await,
            Err(e) => {
                log::warn!("⚠️  Could not count pending votes: {}", e);
                None
            }
        }
    }

    /// Run a sync pass now. No-op while offline or already syncing.
    pub async fn sync_pending_votes(&self) -> Option<SyncReport> {
        let start_sync = {
            let mut connection = self.connection();
            if connection.state == ConnectivityState::Online && connection.connected {
                connection.state = ConnectivityState::Syncing;
                true
            } else {
                false
            }
        };

        if !start_sync {
            log::debug!("Sync skipped: offline or a pass is already running");
            return None;
        }

        self.notify_subscribers().await;
        Some(self.run_sync_pass().await)
    }

    /// Caller has already moved the state to Syncing.
    ///
    /// Each pass covers the records pending when it starts. Votes queued
    /// during a pass get a follow-up pass straight away, without leaving
    /// Syncing, unless connectivity was lost in the meantime. Each record is
    /// tried at most once per call.
    async fn run_sync_pass(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let mut tried: HashSet<String> = HashSet::new();

        loop {
            let snapshot: Vec<OfflineVoteRecord> = match self.load_records().await {
                Ok(records) => records
                    .into_iter()
                    .filter(|r| !r.synced && !tried.contains(&r.local_id))
                    .collect(),
                Err(e) => {
                    log::error!("❌ Could not load offline votes: {}", e);
                    break;
                }
            };
            if snapshot.is_empty() {
                break;
            }
            if !tried.is_empty() {
                if !self.connection().connected {
                    break;
                }
                log::info!("🔄 {} votes queued during sync, starting follow-up pass", snapshot.len());
            } else {
                log::info!("🔄 Syncing {} offline votes", snapshot.len());
            }

            for record in snapshot {
                tried.insert(record.local_id.clone());
                self.sync_record(record, &mut report).await;
            }
        }

        let last_sync = PersistedSyncState {
            last_sync: Some((self.now_fn)()),
        };
        if let Err(e) = self.save_sync_state(&last_sync).await {
            log::error!("❌ Could not persist last sync time: {}", e);
        }

        {
            let mut connection = self.connection();
            connection.state = if connection.connected {
                ConnectivityState::Online
            } else {
                ConnectivityState::Offline
            };
        }

        log::info!(
            "✅ Sync pass finished: {}/{} votes synced",
            report.synced,
            report.attempted
        );
        self.notify_subscribers().await;

        report
    }

    async fn sync_record(&self, record: OfflineVoteRecord, report: &mut SyncReport) {
        report.attempted += 1;

        match self.submitter.submit(&record.vote).await {
            Ok(ack) => match self.mark_synced(&record.local_id).await {
                Ok(()) if ack.duplicate => {
                    log::info!("🔁 Offline vote {} was already upstream", record.local_id);
                    report.synced += 1;
                }
                Ok(()) => report.synced += 1,
                Err(e) => {
                    log::error!("❌ Vote {} accepted but not marked synced: {}", record.local_id, e);
                    report.failures.push(SyncSubmissionFailure {
                        local_id: record.local_id,
                        reason: format!("accepted but not marked synced: {e}"),
                    });
                }
            },
            Err(e) => {
                log::warn!("⚠️  Offline vote {} not synced: {}", record.local_id, e);
                report.failures.push(SyncSubmissionFailure {
                    local_id: record.local_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn mark_synced(&self, local_id: &str) -> Result<(), QueueError> {
        let _guard = self.records_lock.lock().await;
        let mut records = self.load_records().await?;

        let now = (self.now_fn)();
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.local_id == local_id && !r.synced)
        {
            record.synced = true;
            record.synced_at = Some(now);
        }

        self.save_records(&records).await
    }

    /// Drop every stored record and the last sync time
    pub async fn clear_offline_data(&self) -> Result<(), QueueError> {
        {
            let _guard = self.records_lock.lock().await;
            self.storage.clear().await?;
        }

        log::info!("🧹 Cleared offline vote data");
        self.notify_subscribers().await;
        Ok(())
    }
}

fn new_local_id() -> String {
    format!("offline_{}", Uuid::new_v4().simple())
}

/// Background task feeding connectivity changes into the manager.
///
/// Transitions are applied here in arrival order. Only the resulting sync
/// work is spawned, so a change arriving mid-pass is not blocked behind it.
pub async fn connectivity_task(
    manager: Arc<OfflineQueueManager>,
    mut connectivity: watch::Receiver<bool>,
) {
    while connectivity.changed().await.is_ok() {
        let online = *connectivity.borrow_and_update();
        let action = manager.apply_connectivity(online);
        manager.announce_connectivity(online).await;

        if action == ConnectivityAction::Nothing {
            continue;
        }

        let manager = manager.clone();
        tokio::spawn(async move {
            if let Some(report) = manager.after_connectivity(action).await {
                if !report.failures.is_empty() {
                    log::warn!("⚠️  {} offline votes still pending", report.failures.len());
                }
            }
        });
    }
}
