use std::collections::HashSet;

use sqlx::PgPool;

use crate::{
    error::AppResult,
    models::{MovieId, RatedWatch, UserId, WatchedFilm},
};

/// Read access to a user's watched history, most recent first where ordered
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait WatchedHistory: Send + Sync {
    /// Favorites with rating >= `min_rating`, best rated first
    async fn top_rated_movie_ids(
        &self,
        user_id: UserId,
        min_rating: f32,
        limit: i64,
    ) -> AppResult<Vec<MovieId>>;

    /// Best rated films regardless of rating, unrated ones last
    async fn fallback_top_movie_ids(&self, user_id: UserId, limit: i64) -> AppResult<Vec<MovieId>>;

    async fn watched_movie_ids(&self, user_id: UserId) -> AppResult<HashSet<MovieId>>;

    /// Rated films, most recently watched first
    async fn recent_rated(&self, user_id: UserId, limit: i64) -> AppResult<Vec<RatedWatch>>;

    async fn recent_watched_movie_ids(&self, user_id: UserId, limit: i64)
        -> AppResult<Vec<MovieId>>;

    async fn list_watched(&self, user_id: UserId, limit: i64) -> AppResult<Vec<WatchedFilm>>;
}

#[derive(Clone)]
pub struct PgWatchedRepository {
    pool: PgPool,
}

impl PgWatchedRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WatchedHistory for PgWatchedRepository {
    async fn top_rated_movie_ids(
        &self,
        user_id: UserId,
        min_rating: f32,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT movie_id FROM watched_films
            WHERE user_id = $1 AND rating IS NOT NULL AND rating >= $2
            ORDER BY rating DESC, watched_date DESC NULLS LAST, id DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(min_rating)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn fallback_top_movie_ids(&self, user_id: UserId, limit: i64) -> AppResult<Vec<MovieId>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT movie_id FROM watched_films
            WHERE user_id = $1
            ORDER BY rating DESC NULLS LAST, watched_date DESC NULLS LAST, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn watched_movie_ids(&self, user_id: UserId) -> AppResult<HashSet<MovieId>> {
        let ids: Vec<MovieId> =
            sqlx::query_scalar("SELECT DISTINCT movie_id FROM watched_films WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn recent_rated(&self, user_id: UserId, limit: i64) -> AppResult<Vec<RatedWatch>> {
        let rows = sqlx::query_as(
            r#"
            SELECT id AS watched_id, movie_id, rating
            FROM watched_films
            WHERE user_id = $1 AND rating IS NOT NULL
            ORDER BY watched_date DESC NULLS LAST, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn recent_watched_movie_ids(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT movie_id FROM watched_films
            WHERE user_id = $1
            ORDER BY watched_date DESC NULLS LAST, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn list_watched(&self, user_id: UserId, limit: i64) -> AppResult<Vec<WatchedFilm>> {
        let films = sqlx::query_as(
            r#"
            SELECT id, movie_id, title, year, rating, review, watched_date
            FROM watched_films
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(films)
    }
}
