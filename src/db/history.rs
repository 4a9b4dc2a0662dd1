use std::collections::HashSet;

use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::{
    error::AppResult,
    models::{MovieId, Recommendation, Tier, UserId},
};

/// Past recommendations shown to a user
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationHistory: Send + Sync {
    /// Movies recommended within the last `days`, newest first
    async fn recent_recommended_movie_ids(
        &self,
        user_id: UserId,
        days: i64,
        limit: i64,
    ) -> AppResult<Vec<MovieId>>;

    /// Every movie recommended within the last `days`
    async fn recently_recommended_set(
        &self,
        user_id: UserId,
        days: i64,
    ) -> AppResult<HashSet<MovieId>>;

    /// Persists the picks actually shown; returns the recommendation id
    async fn record(&self, user_id: UserId, recommendation: &Recommendation) -> AppResult<i64>;
}

#[derive(Clone)]
pub struct PgHistoryRepository {
    pool: PgPool,
}

impl PgHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Vector => "vector",
        Tier::Heuristic => "heuristic",
    }
}

#[async_trait::async_trait]
impl RecommendationHistory for PgHistoryRepository {
    async fn recent_recommended_movie_ids(
        &self,
        user_id: UserId,
        days: i64,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let since = Utc::now() - Duration::days(days);
        let ids = sqlx::query_scalar(
            r#"
            SELECT i.movie_id
            FROM recommendation_items i
            JOIN recommendations r ON r.id = i.recommendation_id
            WHERE r.user_id = $1 AND r.created_at >= $2
            ORDER BY r.created_at DESC, i.id DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn recently_recommended_set(
        &self,
        user_id: UserId,
        days: i64,
    ) -> AppResult<HashSet<MovieId>> {
        let since = Utc::now() - Duration::days(days);
        let ids: Vec<MovieId> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT i.movie_id
            FROM recommendation_items i
            JOIN recommendations r ON r.id = i.recommendation_id
            WHERE r.user_id = $1 AND r.created_at >= $2
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn record(&self, user_id: UserId, recommendation: &Recommendation) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;

        let recommendation_id: i64 = sqlx::query_scalar(
            "INSERT INTO recommendations (user_id, tier) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(tier_label(recommendation.tier))
        .fetch_one(&mut *tx)
        .await?;

        for (position, pick) in recommendation.picks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO recommendation_items (recommendation_id, movie_id, position, strategy, score)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (recommendation_id, movie_id) DO NOTHING
                "#,
            )
            .bind(recommendation_id)
            .bind(pick.movie_id)
            .bind(position as i32 + 1)
            .bind(pick.strategy.as_str())
            .bind(pick.score)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(recommendation_id)
    }
}
