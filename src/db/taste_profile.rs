use sqlx::{types::Json, PgPool};

use crate::{
    error::AppResult,
    models::{AvoidanceProfile, TasteWeights, UserId},
};

/// Precomputed taste profile of a user
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TasteProfileStore: Send + Sync {
    async fn get_weights(&self, user_id: UserId) -> AppResult<Option<TasteWeights>>;

    /// Natural-language taste summary, if one was generated
    async fn get_summary(&self, user_id: UserId) -> AppResult<Option<String>>;

    /// Replaces weights and summary; avoidance patterns are left as they are
    async fn set_profile(
        &self,
        user_id: UserId,
        weights: &TasteWeights,
        summary: &str,
    ) -> AppResult<()>;
}

/// User-declared avoidance patterns
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AvoidancePatternStore: Send + Sync {
    async fn get_avoidance(&self, user_id: UserId) -> AppResult<AvoidanceProfile>;

    async fn set_avoidance(&self, user_id: UserId, profile: &AvoidanceProfile) -> AppResult<()>;
}

#[derive(Clone)]
pub struct PgTasteProfileRepository {
    pool: PgPool,
}

impl PgTasteProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TasteProfileStore for PgTasteProfileRepository {
    async fn get_weights(&self, user_id: UserId) -> AppResult<Option<TasteWeights>> {
        let raw: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT weights_json FROM taste_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        // Older or hand-edited payloads that no longer parse count as no profile
        Ok(raw.and_then(|value| match serde_json::from_value::<TasteWeights>(value) {
            Ok(weights) if !weights.likes.genres.is_empty() => Some(weights),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Ignoring unreadable taste weights");
                None
            }
        }))
    }

    async fn get_summary(&self, user_id: UserId) -> AppResult<Option<String>> {
        let summary: Option<String> =
            sqlx::query_scalar("SELECT summary_text FROM taste_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(summary.filter(|s| !s.trim().is_empty()))
    }

    async fn set_profile(
        &self,
        user_id: UserId,
        weights: &TasteWeights,
        summary: &str,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taste_profiles (user_id, summary_text, weights_json, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id)
            DO UPDATE SET summary_text = EXCLUDED.summary_text,
                          weights_json = EXCLUDED.weights_json,
                          updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(summary)
        .bind(Json(weights))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AvoidancePatternStore for PgTasteProfileRepository {
    async fn get_avoidance(&self, user_id: UserId) -> AppResult<AvoidanceProfile> {
        let raw: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT avoids_json FROM taste_profiles WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(raw
            .and_then(|value| match serde_json::from_value::<AvoidanceProfile>(value) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Ignoring unreadable avoidance patterns");
                    None
                }
            })
            .unwrap_or_default())
    }

    async fn set_avoidance(&self, user_id: UserId, profile: &AvoidanceProfile) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO taste_profiles (user_id, avoids_json, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (user_id)
            DO UPDATE SET avoids_json = EXCLUDED.avoids_json, updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(Json(profile))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
