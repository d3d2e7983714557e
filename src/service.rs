//! Vote submission: validation, session check, rate limit, ledger, aggregation
//!
//! A vote is recorded at most once. Votes carrying a verified session token
//! are keyed by that token, otherwise by the client-supplied vote id. Votes
//! with neither fall back to rejecting the same pairing from the same voter
//! within [`DUPLICATE_WINDOW_SECS`].

use crate::aggregation::AggregationProcessor;
use crate::error::StoreError;
use crate::ratelimit::{RateDecision, RateLimiter};
use crate::selection::{SessionCheck, SessionSigner};
use crate::store::{AppendOutcome, VoteLedger};
use crate::types::{VoteEvent, VoteSubmission};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const DUPLICATE_WINDOW_SECS: i64 = 5;
const DUPLICATE_SCAN_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("winner and loser must be different items")]
    SelfPairing,

    #[error("session was issued for a different pair")]
    SessionMismatch,

    #[error("session id was not issued by this server")]
    UnverifiedSession,

    #[error("vote already recorded as {vote_id}")]
    Duplicate { vote_id: String },

    #[error("rate limit exceeded, resets at {}", .0.reset_at)]
    RateLimited(RateDecision),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub success: bool,
    pub vote_id: String,
    pub timestamp: DateTime<Utc>,
    /// False when some period updates failed; the vote is still recorded
    pub aggregated: bool,
}

/// Reject payloads with empty fields or a self-pairing
pub fn validate_submission(vote: &VoteSubmission) -> Result<(), SubmissionError> {
    let fields = [
        ("winnerId", &vote.winner_id),
        ("loserId", &vote.loser_id),
        ("category", &vote.category),
        ("sessionId", &vote.session_id),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(SubmissionError::MissingField(name));
        }
    }

    if vote.winner_id == vote.loser_id {
        return Err(SubmissionError::SelfPairing);
    }
    Ok(())
}

pub struct VoteService {
    ledger: Arc<dyn VoteLedger>,
    processor: Arc<AggregationProcessor>,
    limiter: Option<Arc<RateLimiter>>,
    signer: Arc<SessionSigner>,
    accept_opaque_sessions: bool,

    /// Timestamp function (for testing with mock time)
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl VoteService {
    pub fn new(ledger: Arc<dyn VoteLedger>, processor: Arc<AggregationProcessor>) -> Self {
        Self::new_with_timestamp_fn(ledger, processor, Box::new(Utc::now))
    }

    pub fn new_with_timestamp_fn(
        ledger: Arc<dyn VoteLedger>,
        processor: Arc<AggregationProcessor>,
        now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            ledger,
            processor,
            limiter: None,
            signer: Arc::new(SessionSigner::random()),
            accept_opaque_sessions: true,
            now_fn,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Must be the signer the pair selector issues tokens with
    pub fn with_session_signer(mut self, signer: Arc<SessionSigner>) -> Self {
        self.signer = signer;
        self
    }

    /// Whether session ids not issued by the selector are accepted
    pub fn with_opaque_sessions(mut self, accept: bool) -> Self {
        self.accept_opaque_sessions = accept;
        self
    }

    /// Key the ledger deduplicates on, if the vote has one
    fn idempotency_key(&self, vote: &VoteSubmission, check: SessionCheck) -> Option<String> {
        if check == SessionCheck::Matches {
            return Some(vote.session_id.clone());
        }
        vote.client_vote_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| format!("client:{}", id))
    }

    /// Same pairing from the same voter inside the window
    async fn recent_duplicate(
        &self,
        voter_id: &str,
        vote: &VoteSubmission,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, SubmissionError> {
        let pairing = vote.pairing_key();
        let recent = self
            .ledger
            .recent_votes_for_voter(voter_id, DUPLICATE_SCAN_LIMIT)
            .await?;

        Ok(recent
            .into_iter()
            .take_while(|v| (now - v.timestamp).num_seconds() < DUPLICATE_WINDOW_SECS)
            .find(|v| v.pairing_key() == pairing)
            .map(|v| v.vote_id))
    }

    /// Accept one vote from `voter_id`.
    ///
    /// The vote is durable once appended to the ledger; aggregation
    /// failures after that are reported in the receipt, not as an error.
    pub async fn submit(
        &self,
        voter_id: &str,
        vote: VoteSubmission,
    ) -> Result<VoteReceipt, SubmissionError> {
        let now = (self.now_fn)();

        if let Some(limiter) = &self.limiter {
            let decision = limiter.check(voter_id, now);
            if !decision.allowed {
                return Err(SubmissionError::RateLimited(decision));
            }
        }

        validate_submission(&vote)?;

        let check = self.signer.check(&vote.session_id, &vote.pairing_key());
        match check {
            SessionCheck::Mismatch => {
                log::warn!(
                    "Vote from {} rejected: session {} does not match pair {}",
                    voter_id,
                    vote.session_id,
                    vote.pairing_key()
                );
                return Err(SubmissionError::SessionMismatch);
            }
            SessionCheck::Opaque if !self.accept_opaque_sessions => {
                return Err(SubmissionError::UnverifiedSession);
            }
            _ => {}
        }

        let key = self.idempotency_key(&vote, check);
        if key.is_none() {
            if let Some(vote_id) = self.recent_duplicate(voter_id, &vote, now).await? {
                log::info!("🔁 Vote from {} repeats {} within window", voter_id, vote_id);
                return Err(SubmissionError::Duplicate { vote_id });
            }
        }

        let event = VoteEvent::from_submission(Uuid::new_v4().to_string(), voter_id, vote, now)
            .with_idempotency_key(key);
        if let AppendOutcome::Duplicate { vote_id } = self.ledger.append(&event).await? {
            log::info!("🔁 Vote from {} already recorded as {}", voter_id, vote_id);
            return Err(SubmissionError::Duplicate { vote_id });
        }

        let report = self.processor.on_vote(&event).await;
        if !report.is_complete() {
            log::warn!(
                "⚠️  Vote {} recorded with {} failed aggregate updates",
                event.vote_id,
                report.failures.len()
            );
        }

        log::debug!(
            "Vote {} recorded: {} beat {} in {}",
            event.vote_id,
            event.winner_id,
            event.loser_id,
            event.category
        );

        Ok(VoteReceipt {
            success: true,
            vote_id: event.vote_id,
            timestamp: event.timestamp,
            aggregated: report.is_complete(),
        })
    }
}
