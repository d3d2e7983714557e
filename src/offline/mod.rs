//! Client-side offline vote queue

pub mod manager;
pub mod storage;
pub mod submitter;

pub use manager::{
    connectivity_task, ConnectivityState, OfflineQueueManager, OfflineVoteRecord,
    SyncReport, SyncStatus, SyncSubmissionFailure, VoteDisposition, OFFLINE_VOTES_KEY,
    SYNC_STATUS_KEY,
};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, QueueError};
pub use submitter::{
    HttpVoteSubmitter, SubmissionAck, SubmitError, VoteSubmitter, DUPLICATE_VOTE_CODE,
    VOTER_HEADER,
};
