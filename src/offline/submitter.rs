//! Upstream submission of queued votes

use crate::types::VoteSubmission;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const VOTER_HEADER: &str = "x-voter-id";

/// Error `code` the server uses for a vote it has already recorded
pub const DUPLICATE_VOTE_CODE: &str = "duplicate_vote";

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for SubmitError {
    fn from(err: reqwest::Error) -> Self {
        SubmitError::Transport(err.to_string())
    }
}

/// What the upstream said when it took a vote
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAck {
    #[serde(default)]
    pub vote_id: Option<String>,
    /// The upstream already had this vote
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectionBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    vote_id: Option<String>,
}

/// A 409 carrying the duplicate code means an earlier attempt landed
fn duplicate_ack(status: StatusCode, body: &str) -> Option<SubmissionAck> {
    if status != StatusCode::CONFLICT {
        return None;
    }
    let rejection: RejectionBody = serde_json::from_str(body).ok()?;
    (rejection.code.as_deref() == Some(DUPLICATE_VOTE_CODE)).then(|| SubmissionAck {
        vote_id: rejection.vote_id,
        duplicate: true,
    })
}

#[async_trait]
pub trait VoteSubmitter: Send + Sync {
    async fn submit(&self, vote: &VoteSubmission) -> Result<SubmissionAck, SubmitError>;
}

/// Posts votes to `<endpoint>/api/votes`
pub struct HttpVoteSubmitter {
    client: reqwest::Client,
    votes_url: String,
    voter_id: String,
}

impl HttpVoteSubmitter {
    pub fn new(endpoint: &str, voter_id: impl Into<String>) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            votes_url: format!("{}/api/votes", endpoint.trim_end_matches('/')),
            voter_id: voter_id.into(),
        })
    }

    pub fn votes_url(&self) -> &str {
        &self.votes_url
    }
}

#[async_trait]
impl VoteSubmitter for HttpVoteSubmitter {
    async fn submit(&self, vote: &VoteSubmission) -> Result<SubmissionAck, SubmitError> {
        let response = self
            .client
            .post(&self.votes_url)
            .header(VOTER_HEADER, &self.voter_id)
            .json(vote)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Some(ack) = duplicate_ack(status, &body) {
                log::debug!("Vote already recorded upstream as {:?}", ack.vote_id);
                return Ok(ack);
            }
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // An unparseable success body still counts as accepted
        let ack = response.json::<SubmissionAck>().await.unwrap_or_default();
        Ok(ack)
    }
}
