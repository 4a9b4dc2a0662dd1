use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::AppResult,
    models::{AvoidanceProfile, UserId},
};

use super::AppState;

pub async fn get_avoids(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<AvoidanceProfile>> {
    let profile = state.stores.avoidance.get_avoidance(user_id).await?;
    Ok(Json(profile))
}

pub async fn put_avoids(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(profile): Json<AvoidanceProfile>,
) -> AppResult<Json<AvoidanceProfile>> {
    profile.validate()?;
    state.stores.avoidance.set_avoidance(user_id, &profile).await?;
    tracing::info!(user_id, patterns = profile.patterns.len(), "Stored avoidance patterns");
    Ok(Json(profile))
}
