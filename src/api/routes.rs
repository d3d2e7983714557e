//! Request handlers and error-to-status mapping

use super::SharedState;
use crate::leaderboard::{parse_period, LeaderboardError, LeaderboardPage, LeaderboardQuery};
use crate::offline::{DUPLICATE_VOTE_CODE, VOTER_HEADER};
use crate::promotion::{self, PromotionError};
use crate::selection::{SelectedPair, SelectionError};
use crate::service::{SubmissionError, VoteReceipt};
use crate::types::{Item, VoteSubmission};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

const ANONYMOUS_VOTER: &str = "anonymous";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vote_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
    vote_id: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Display) -> Self {
        Self {
            status,
            message: message.to_string(),
            code: None,
            vote_id: None,
            retry_after_secs: None,
        }
    }

    fn internal(err: impl Display) -> Self {
        log::error!("❌ Request failed: {}", err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            vote_id: self.vote_id,
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<SelectionError> for ApiError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::InsufficientCandidates { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, err)
            }
            SelectionError::NoNovelPair { .. } => ApiError::new(StatusCode::CONFLICT, err),
            SelectionError::Store(e) => ApiError::internal(e),
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::MissingField(_)
            | SubmissionError::SelfPairing
            | SubmissionError::UnverifiedSession => ApiError::new(StatusCode::BAD_REQUEST, err),
            SubmissionError::SessionMismatch => ApiError::new(StatusCode::CONFLICT, err),
            SubmissionError::Duplicate { ref vote_id } => ApiError {
                code: Some(DUPLICATE_VOTE_CODE),
                vote_id: Some(vote_id.clone()),
                ..ApiError::new(StatusCode::CONFLICT, &err)
            },
            SubmissionError::RateLimited(decision) => ApiError {
                retry_after_secs: Some(decision.retry_after_secs(Utc::now())),
                ..ApiError::new(StatusCode::TOO_MANY_REQUESTS, err)
            },
            SubmissionError::Store(e) => ApiError::internal(e),
        }
    }
}

impl From<LeaderboardError> for ApiError {
    fn from(err: LeaderboardError) -> Self {
        match err {
            LeaderboardError::InvalidLimit(_) | LeaderboardError::UnknownPeriod(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, err)
            }
            LeaderboardError::Store(e) => ApiError::internal(e),
        }
    }
}

impl From<PromotionError> for ApiError {
    fn from(err: PromotionError) -> Self {
        match err {
            PromotionError::InvalidPromotionWeight(_) | PromotionError::NotApproved(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, err)
            }
            PromotionError::ItemNotFound(_) => ApiError::new(StatusCode::NOT_FOUND, err),
            PromotionError::Store(e) => ApiError::internal(e),
        }
    }
}

fn voter_id(headers: &HeaderMap) -> String {
    headers
        .get(VOTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_VOTER)
        .to_string()
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct PairParams {
    pub category: Option<String>,
}

/// GET /api/pair
pub async fn get_pair(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<PairParams>,
) -> Result<Json<SelectedPair>, ApiError> {
    let voter = voter_id(&headers);
    let category = params.category.as_deref().filter(|c| !c.is_empty());

    let pair = state.selector.select_pair(category, &voter).await?;
    Ok(Json(pair))
}

/// POST /api/votes
pub async fn submit_vote(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(vote): Json<VoteSubmission>,
) -> Result<Json<VoteReceipt>, ApiError> {
    let voter = voter_id(&headers);
    let receipt = state.votes.submit(&voter, vote).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub period: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Response, ApiError> {
    let period = parse_period(params.period.as_deref().unwrap_or("all"))?;

    let query = LeaderboardQuery {
        period,
        category: params.category.filter(|c| !c.is_empty()),
        limit: params.limit,
        offset: params.offset.unwrap_or(0),
    };
    let page: LeaderboardPage = state.leaderboard.get_page(&query).await?;
    let cache_control = page.cache_control();

    Ok(([(header::CACHE_CONTROL, cache_control)], Json(page)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct PromotionRequest {
    pub weight: i64,
}

/// PUT /api/items/:id/promotion
pub async fn set_promotion(
    State(state): State<SharedState>,
    Path(item_id): Path<String>,
    Json(request): Json<PromotionRequest>,
) -> Result<Json<Item>, ApiError> {
    let item = promotion::set_promotion_weight(
        state.items.as_ref(),
        &item_id,
        request.weight,
        Utc::now(),
    )
    .await?;
    Ok(Json(item))
}
