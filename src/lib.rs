//! Pairwise voting ranking engine
//!
//! - `selection` draws weighted, deduplicated pairs for a voter
//! - `aggregation` folds each vote into day/week/month/year/all-time counters
//! - `leaderboard` ranks items for the current bucket of a period
//! - `offline` queues votes on the client while disconnected and resyncs
//! - `api` exposes the server side over HTTP

pub mod aggregation;
pub mod api;
pub mod config;
pub mod error;
pub mod leaderboard;
pub mod offline;
pub mod promotion;
pub mod ratelimit;
pub mod selection;
pub mod service;
pub mod sqlite_pragma;
pub mod store;
pub mod types;

pub use aggregation::{AggregationProcessor, AggregationReport, Period, PeriodBucket};
pub use error::StoreError;
pub use leaderboard::{LeaderboardEntry, LeaderboardReader};
pub use offline::{OfflineQueueManager, SyncStatus};
pub use selection::{PairSelector, SelectedPair};
pub use service::VoteService;
pub use store::SqliteStore;
pub use types::{Item, ItemStatus, PairingKey, PromotionWeight, VoteEvent, VoteSubmission};
