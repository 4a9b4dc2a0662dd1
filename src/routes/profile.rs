use axum::{
    extract::{Path, State},
    Json,
};

use crate::{error::AppResult, models::UserId, services::TasteProfile};

use super::AppState;

pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<TasteProfile>> {
    let (weights, summary) = tokio::try_join!(
        state.stores.profiles.get_weights(user_id),
        state.stores.profiles.get_summary(user_id),
    )?;
    Ok(Json(TasteProfile {
        weights: weights.unwrap_or_default(),
        summary: summary.unwrap_or_default(),
    }))
}

/// Recomputes the taste profile from the user's current ratings
pub async fn rebuild_profile(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<TasteProfile>> {
    let profile = state.profile_builder.rebuild(user_id).await?;
    Ok(Json(profile))
}
