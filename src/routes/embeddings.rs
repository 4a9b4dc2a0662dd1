use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppResult,
    models::{SourceType, UserId},
};

use super::AppState;

fn default_backfill_limit() -> i64 {
    500
}

fn default_warm_up_limit() -> usize {
    1500
}

#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub user_id: UserId,
    pub source_type: SourceType,
    pub source_id: i64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub user_id: UserId,
    #[serde(default = "default_backfill_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct WarmUpRequest {
    pub user_id: UserId,
    #[serde(default = "default_warm_up_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub enqueued: usize,
}

pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(request): Json<EnqueueJobRequest>,
) -> AppResult<StatusCode> {
    state
        .producer
        .enqueue_text(
            request.user_id,
            request.source_type,
            request.source_id,
            &request.text,
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Refreshes the taste profile, then enqueues jobs for recent films, reviews and the profile
pub async fn backfill(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> AppResult<Json<EnqueuedResponse>> {
    state.profile_builder.rebuild(request.user_id).await?;
    let enqueued = state
        .producer
        .backfill_user(request.user_id, request.limit.max(0))
        .await?;
    Ok(Json(EnqueuedResponse { enqueued }))
}

/// Enqueues metadata jobs for the user's not-yet-embedded candidate pool
pub async fn warm_up(
    State(state): State<AppState>,
    Json(request): Json<WarmUpRequest>,
) -> AppResult<Json<EnqueuedResponse>> {
    let pool = state.recommender.candidate_pool(request.user_id).await?;
    let enqueued = state
        .producer
        .warm_up_candidates(request.user_id, &pool.candidates, request.limit)
        .await?;
    Ok(Json(EnqueuedResponse { enqueued }))
}
