use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    db::RateDecision,
    error::{AppError, AppResult},
    models::{Recommendation, UserId},
};

use super::AppState;

const RECOMMEND_COMMAND: &str = "recommend";
const MAX_COUNT: usize = 20;

fn default_count() -> usize {
    3
}

#[derive(Debug, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    #[serde(default = "default_count")]
    pub count: usize,
}

/// Handler for recommendations endpoint
pub async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendationRequest>,
) -> AppResult<Json<Recommendation>> {
    if request.count == 0 || request.count > MAX_COUNT {
        return Err(AppError::InvalidInput(format!(
            "count must be between 1 and {}",
            MAX_COUNT
        )));
    }

    let decision = state
        .stores
        .rate_limiter
        .check_and_touch(request.user_id, RECOMMEND_COMMAND, state.recommend_interval_secs)
        .await?;
    if let RateDecision::Limited { retry_after_secs } = decision {
        tracing::info!(user_id = request.user_id, retry_after_secs, "Recommendation rate limited");
        return Err(AppError::RateLimited { retry_after_secs });
    }

    let recommendation = state
        .recommender
        .recommend(request.user_id, request.count)
        .await?;

    if !recommendation.picks.is_empty() {
        let id = state
            .stores
            .history
            .record(request.user_id, &recommendation)
            .await?;
        tracing::debug!(user_id = request.user_id, recommendation_id = id, "Recorded recommendation");
    }

    Ok(Json(recommendation))
}
