use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use crate::{
    error::{AppError, AppResult},
    models::{EmbeddingJob, NewEmbeddingJob, SourceType, UserId},
};

/// Keyed access to persisted text embeddings
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Returns the stored vectors for whichever of `source_ids` have one
    async fn get_embeddings(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_ids: &[i64],
    ) -> AppResult<HashMap<i64, Vec<f32>>>;

    /// Inserts or replaces the vector for (user, source type, source id)
    async fn upsert_embedding(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_id: i64,
        content_text: &str,
        embedding: &[f32],
    ) -> AppResult<()>;
}

/// Durable embedding job queue
///
/// Producers upsert on (user, source type, source id); consumers claim pending
/// jobs so that no job is ever handed to two workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    /// Creates the job or resets the existing one for the same key to pending
    async fn enqueue(&self, job: NewEmbeddingJob) -> AppResult<()>;

    /// Claims up to `batch_size` pending jobs, moving them to processing
    async fn claim_batch(&self, batch_size: i64) -> AppResult<Vec<EmbeddingJob>>;

    async fn mark_done(&self, job_id: i64) -> AppResult<()>;

    async fn mark_failed(&self, job_id: i64, error: &str) -> AppResult<()>;
}

/// Postgres-backed embedding store and job queue
#[derive(Clone)]
pub struct PgEmbeddingRepository {
    pool: PgPool,
}

impl PgEmbeddingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    user_id: i64,
    source_type: String,
    source_id: i64,
    content_text: String,
    model: String,
    dimensions: i32,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    locked_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for EmbeddingJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(EmbeddingJob {
            id: row.id,
            user_id: row.user_id,
            source_type: row.source_type.parse().map_err(AppError::Internal)?,
            source_id: row.source_id,
            content_text: row.content_text,
            model: row.model,
            dimensions: row.dimensions,
            status: row.status.parse().map_err(AppError::Internal)?,
            attempts: row.attempts,
            last_error: row.last_error,
            locked_at: row.locked_at,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingStore for PgEmbeddingRepository {
    async fn get_embeddings(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_ids: &[i64],
    ) -> AppResult<HashMap<i64, Vec<f32>>> {
        if source_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(i64, Vector)> = sqlx::query_as(
            r#"
            SELECT source_id, embedding
            FROM text_embeddings
            WHERE user_id = $1 AND source_type = $2 AND source_id = ANY($3)
            "#,
        )
        .bind(user_id)
        .bind(source_type.as_str())
        .bind(source_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(source_id, embedding)| (source_id, embedding.to_vec()))
            .collect())
    }

    async fn upsert_embedding(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_id: i64,
        content_text: &str,
        embedding: &[f32],
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO text_embeddings (user_id, source_type, source_id, content_text, embedding)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, source_type, source_id)
            DO UPDATE SET content_text = EXCLUDED.content_text, embedding = EXCLUDED.embedding
            "#,
        )
        .bind(user_id)
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(content_text)
        .bind(Vector::from(embedding.to_vec()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl JobQueue for PgEmbeddingRepository {
    async fn enqueue(&self, job: NewEmbeddingJob) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_jobs
                (user_id, source_type, source_id, content_text, model, dimensions, status, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0)
            ON CONFLICT (user_id, source_type, source_id)
            DO UPDATE SET
                content_text = EXCLUDED.content_text,
                model = EXCLUDED.model,
                dimensions = EXCLUDED.dimensions,
                status = 'pending',
                attempts = 0,
                last_error = NULL,
                locked_at = NULL,
                updated_at = now()
            "#,
        )
        .bind(job.user_id)
        .bind(job.source_type.as_str())
        .bind(job.source_id)
        .bind(&job.content_text)
        .bind(&job.model)
        .bind(job.dimensions)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            user_id = job.user_id,
            source_type = %job.source_type,
            source_id = job.source_id,
            "Embedding job enqueued"
        );

        Ok(())
    }

    async fn claim_batch(&self, batch_size: i64) -> AppResult<Vec<EmbeddingJob>> {
        // Claim and status change happen in one statement, so a row is either
        // skipped by a concurrent worker or already moved past 'pending'.
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            UPDATE embedding_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                locked_at = now(),
                updated_at = now()
            WHERE id IN (
                SELECT id FROM embedding_jobs
                WHERE status = 'pending'
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, user_id, source_type, source_id, content_text, model, dimensions,
                      status, attempts, last_error, locked_at
            "#,
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = rows
            .into_iter()
            .map(EmbeddingJob::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    async fn mark_done(&self, job_id: i64) -> AppResult<()> {
        // A job re-enqueued while processing is back to 'pending' and must stay so
        sqlx::query(
            r#"
            UPDATE embedding_jobs
            SET status = 'done', last_error = NULL, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: i64, error: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE embedding_jobs
            SET status = 'failed', last_error = $2, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = crate::db::create_pool(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    fn job(user_id: i64, source_id: i64, text: &str) -> NewEmbeddingJob {
        NewEmbeddingJob {
            user_id,
            source_type: SourceType::FilmMeta,
            source_id,
            content_text: text.to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 3,
        }
    }

    #[test]
    fn test_job_row_conversion() {
        let row = JobRow {
            id: 7,
            user_id: 1,
            source_type: "review".into(),
            source_id: 42,
            content_text: "Movie: Heat".into(),
            model: "m".into(),
            dimensions: 3,
            status: "processing".into(),
            attempts: 1,
            last_error: None,
            locked_at: None,
        };
        let job = EmbeddingJob::try_from(row).unwrap();
        assert_eq!(job.source_type, SourceType::Review);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_job_row_with_unknown_status_is_rejected() {
        let row = JobRow {
            id: 7,
            user_id: 1,
            source_type: "review".into(),
            source_id: 42,
            content_text: String::new(),
            model: "m".into(),
            dimensions: 3,
            status: "archived".into(),
            attempts: 0,
            last_error: None,
            locked_at: None,
        };
        assert!(EmbeddingJob::try_from(row).is_err());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_reenqueue_keeps_single_row() {
        let pool = test_pool().await;
        let repo = PgEmbeddingRepository::new(pool.clone());
        let user_id = 900_001;
        sqlx::query("DELETE FROM embedding_jobs WHERE user_id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();

        repo.enqueue(job(user_id, 1, "first")).await.unwrap();
        repo.enqueue(job(user_id, 1, "second")).await.unwrap();

        let (count, text): (i64, String) = sqlx::query_as(
            "SELECT COUNT(*), MAX(content_text) FROM embedding_jobs WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
        assert_eq!(text, "second");
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_claims_never_overlap() {
        let pool = test_pool().await;
        let repo = PgEmbeddingRepository::new(pool.clone());
        let user_id = 900_002;
        sqlx::query("DELETE FROM embedding_jobs WHERE user_id = $1")
            .bind(user_id)
            .execute(&pool)
            .await
            .unwrap();
        for source_id in 0..20 {
            repo.enqueue(job(user_id, source_id, "text")).await.unwrap();
        }

        let (a, b) = tokio::join!(repo.claim_batch(15), repo.claim_batch(15));
        let mut ids: Vec<i64> = a.unwrap().into_iter().chain(b.unwrap()).map(|j| j.id).collect();
        let claimed = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), claimed);

        let again = repo.claim_batch(50).await.unwrap();
        assert!(again.iter().all(|j| j.user_id != user_id));
    }
}
