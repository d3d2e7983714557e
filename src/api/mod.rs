//! HTTP surface
//!
//! Routes:
//! - `GET /health`
//! - `GET /api/pair?category=` (voter from `x-voter-id`)
//! - `POST /api/votes`
//! - `GET /api/leaderboard?period=&category=&limit=&offset=`
//! - `PUT /api/items/:id/promotion`

pub mod routes;

use crate::aggregation::AggregationProcessor;
use crate::config::RankingConfig;
use crate::leaderboard::LeaderboardReader;
use crate::ratelimit::RateLimiter;
use crate::selection::{PairSelector, SessionSigner};
use crate::service::VoteService;
use crate::store::{ItemStore, SqliteStore};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Components shared across handlers
pub struct AppState {
    pub selector: PairSelector,
    pub votes: VoteService,
    pub leaderboard: LeaderboardReader,
    pub items: Arc<dyn ItemStore>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every component onto one SQLite store
    pub fn from_store(store: Arc<SqliteStore>, config: &RankingConfig) -> Self {
        let signer = Arc::new(match &config.session_secret {
            Some(secret) => SessionSigner::new(secret),
            None => {
                log::warn!("⚠️  SESSION_SECRET not set, session tokens will not survive a restart");
                SessionSigner::random()
            }
        });

        let selector = PairSelector::new(store.clone(), store.clone())
            .with_session_signer(signer.clone())
            .with_dedup_policy(config.dedup)
            .with_placement(config.placement)
            .with_history_limit(config.voter_history_limit);

        let processor = Arc::new(
            AggregationProcessor::new(store.clone())
                .with_item_counters(store.clone())
                .with_loss_tracking(config.count_losses),
        );
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let votes = VoteService::new(store.clone(), processor)
            .with_rate_limiter(limiter)
            .with_session_signer(signer)
            .with_opaque_sessions(config.accept_opaque_sessions);

        let leaderboard = LeaderboardReader::new(store.clone(), store.clone())
            .with_default_limit(config.leaderboard_default_limit);

        Self {
            selector,
            votes,
            leaderboard,
            items: store,
        }
    }
}

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/pair", get(routes::get_pair))
        .route("/api/votes", post(routes::submit_vote))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/api/items/:id/promotion", put(routes::set_promotion))
        .with_state(state)
}
