use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::{error::AppResult, models::UserId};

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    /// Decision for a key last used at `last_used_at`
    pub fn evaluate(last_used_at: DateTime<Utc>, now: DateTime<Utc>, interval_secs: i64) -> Self {
        let elapsed = now - last_used_at;
        let interval = Duration::seconds(interval_secs);
        if elapsed < interval {
            RateDecision::Limited {
                retry_after_secs: (interval - elapsed).num_seconds().max(1),
            }
        } else {
            RateDecision::Allowed
        }
    }
}

/// Per-(user, command) interval limiter
///
/// Of any number of concurrent calls for one key, at most one is allowed per
/// interval; an allowed call records its own time as the new last use.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check_and_touch(
        &self,
        user_id: UserId,
        command: &str,
        interval_secs: i64,
    ) -> AppResult<RateDecision>;
}

#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_and_touch(
        &self,
        user_id: UserId,
        command: &str,
        interval_secs: i64,
    ) -> AppResult<RateDecision> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Brand-new keys race here: only the insert that lands is allowed,
        // the others block on it and then see its timestamp below.
        let inserted = sqlx::query(
            r#"
            INSERT INTO command_rate_limits (user_id, command, last_used_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, command) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(command)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted > 0 {
            tx.commit().await?;
            return Ok(RateDecision::Allowed);
        }

        let last_used_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            SELECT last_used_at FROM command_rate_limits
            WHERE user_id = $1 AND command = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(command)
        .fetch_one(&mut *tx)
        .await?;

        let decision = RateDecision::evaluate(last_used_at, now, interval_secs);
        if decision.is_allowed() {
            sqlx::query(
                "UPDATE command_rate_limits SET last_used_at = $3 WHERE user_id = $1 AND command = $2",
            )
            .bind(user_id)
            .bind(command)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        tracing::debug!(user_id, command, ?decision, "Rate limit checked");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_within_interval() {
        let now = Utc::now();
        let decision = RateDecision::evaluate(now - Duration::seconds(10), now, 30);
        assert_eq!(decision, RateDecision::Limited { retry_after_secs: 20 });
    }

    #[test]
    fn test_evaluate_after_interval() {
        let now = Utc::now();
        assert!(RateDecision::evaluate(now - Duration::seconds(30), now, 30).is_allowed());
        assert!(RateDecision::evaluate(now - Duration::hours(1), now, 30).is_allowed());
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let now = Utc::now();
        let decision = RateDecision::evaluate(now - Duration::milliseconds(29_900), now, 30);
        assert_eq!(decision, RateDecision::Limited { retry_after_secs: 1 });
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_first_calls_allow_exactly_one() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let limiter = PgRateLimiter::new(pool.clone());
        let user_id = 900_100;
        sqlx::query("DELETE FROM command_rate_limits WHERE user_id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                limiter.check_and_touch(user_id, "recommend", 60).await.unwrap()
            }));
        }

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap().is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 1);
    }
}
