//! Consumer side of the embedding job queue.

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    config::WorkerConfig,
    db::{EmbeddingStore, JobQueue},
    error::{AppError, AppResult},
    models::EmbeddingJob,
    services::providers::EmbeddingProvider,
};

/// Longest error text persisted on a failed job
pub const MAX_ERROR_LEN: usize = 4000;

fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

/// Jobs sharing one (model, dimensions), in claim order
type JobGroup = ((String, i32), Vec<EmbeddingJob>);

fn group_by_model(jobs: Vec<EmbeddingJob>) -> Vec<JobGroup> {
    let mut groups: Vec<JobGroup> = Vec::new();
    for job in jobs {
        let key = (job.model.clone(), job.dimensions);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(job),
            None => groups.push((key, vec![job])),
        }
    }
    groups
}

/// Stops a running worker after its current batch
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl WorkerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Embedding worker shutdown signal sent");
    }
}

pub struct EmbeddingWorker {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn EmbeddingStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: WorkerConfig,
}

impl EmbeddingWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn EmbeddingStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            provider,
            config,
        }
    }

    /// Claims one batch and settles every job in it; returns how many were claimed
    pub async fn run_once(&self) -> AppResult<usize> {
        let jobs = self.queue.claim_batch(self.config.batch_size).await?;
        let claimed = jobs.len();
        if claimed == 0 {
            return Ok(0);
        }

        for ((model, dimensions), group) in group_by_model(jobs) {
            match self.embed_group(&group, &model, dimensions).await {
                Ok(vectors) => self.store_group(&group, vectors).await,
                Err(e) => {
                    tracing::error!(model = %model, jobs = group.len(), error = %e, "Embedding batch failed");
                    self.fail_group(&group, &e.to_string()).await;
                }
            }
        }

        Ok(claimed)
    }

    async fn embed_group(
        &self,
        group: &[EmbeddingJob],
        model: &str,
        dimensions: i32,
    ) -> AppResult<Vec<Vec<f32>>> {
        let texts: Vec<String> = group.iter().map(|j| j.content_text.clone()).collect();
        let vectors = self.provider.embed(&texts, model, dimensions).await?;

        if vectors.len() != group.len() {
            return Err(AppError::ExternalApi(format!(
                "Expected {} embeddings, got {}",
                group.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions as usize) {
            return Err(AppError::ExternalApi(format!(
                "Expected {} dimensions, got {}",
                dimensions,
                bad.len()
            )));
        }
        Ok(vectors)
    }

    async fn store_group(&self, group: &[EmbeddingJob], vectors: Vec<Vec<f32>>) {
        for (job, vector) in group.iter().zip(vectors) {
            let stored = self
                .store
                .upsert_embedding(
                    job.user_id,
                    job.source_type,
                    job.source_id,
                    &job.content_text,
                    &vector,
                )
                .await;

            let settled = match stored {
                Ok(()) => self.queue.mark_done(job.id).await,
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "Failed to store embedding");
                    self.queue
                        .mark_failed(job.id, &truncate_error(&e.to_string()))
                        .await
                }
            };
            if let Err(e) = settled {
                tracing::error!(job_id = job.id, error = %e, "Failed to settle embedding job");
            }
        }
    }

    async fn fail_group(&self, group: &[EmbeddingJob], message: &str) {
        let message = truncate_error(message);
        for job in group {
            if let Err(e) = self.queue.mark_failed(job.id, &message).await {
                tracing::error!(job_id = job.id, error = %e, "Failed to mark embedding job failed");
            }
        }
    }

    /// Polls until shutdown; sleeps only when the queue came back empty
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            batch_size = self.config.batch_size,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Embedding worker started"
        );
        let mut processed = 0usize;

        loop {
            let idle = match self.run_once().await {
                Ok(0) => true,
                Ok(n) => {
                    processed += n;
                    tracing::debug!(jobs = n, processed, "Embedding batch settled");
                    false
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim embedding jobs");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            } else {
                match shutdown_rx.try_recv() {
                    Err(mpsc::error::TryRecvError::Empty) => tokio::task::yield_now().await,
                    _ => break,
                }
            }
        }

        tracing::info!(processed, "Embedding worker stopped");
    }

    pub fn start(self) -> (JoinHandle<()>, WorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(async move { self.run(shutdown_rx).await });
        (task, WorkerHandle { shutdown_tx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::models::{JobStatus, NewEmbeddingJob, SourceType};
    use crate::services::providers::MockEmbeddingProvider;
    use std::time::Duration;

    fn job(source_id: i64, model: &str, dimensions: i32) -> NewEmbeddingJob {
        NewEmbeddingJob {
            user_id: 1,
            source_type: SourceType::FilmMeta,
            source_id,
            content_text: format!("Title: Movie {}", source_id),
            model: model.to_string(),
            dimensions,
        }
    }

    fn worker(store: Arc<InMemoryStore>, provider: MockEmbeddingProvider) -> EmbeddingWorker {
        EmbeddingWorker::new(
            store.clone(),
            store,
            Arc::new(provider),
            WorkerConfig {
                batch_size: 10,
                poll_interval: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_run_once_stores_vectors_and_marks_done() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue(job(10, "m", 2)).await.unwrap();
        store.enqueue(job(20, "m", 2)).await.unwrap();

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .times(1)
            .returning(|texts, _, _| Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect()));

        let worker = worker(store.clone(), provider);
        assert_eq!(worker.run_once().await.unwrap(), 2);

        let stored = store.embedding(1, SourceType::FilmMeta, 20).await.unwrap();
        assert_eq!(stored.embedding, vec!["Title: Movie 20".len() as f32, 1.0]);
        assert!(store.jobs().await.iter().all(|j| j.status == JobStatus::Done));
    }

    #[tokio::test]
    async fn test_empty_queue_does_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let worker = worker(store, MockEmbeddingProvider::new());
        assert_eq!(worker.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_fails_whole_group_with_truncated_error() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue(job(10, "m", 2)).await.unwrap();
        store.enqueue(job(20, "m", 2)).await.unwrap();

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .returning(|_, _, _| Err(AppError::ExternalApi("x".repeat(5000))));

        let worker = worker(store.clone(), provider);
        worker.run_once().await.unwrap();

        let jobs = store.jobs().await;
        assert!(jobs.iter().all(|j| j.status == JobStatus::Failed));
        assert!(jobs
            .iter()
            .all(|j| j.last_error.as_ref().map(|e| e.chars().count()) == Some(MAX_ERROR_LEN)));
        assert!(store.embedding(1, SourceType::FilmMeta, 10).await.is_none());
    }

    #[tokio::test]
    async fn test_jobs_grouped_by_model_and_dimensions() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue(job(10, "small", 2)).await.unwrap();
        store.enqueue(job(20, "large", 3)).await.unwrap();
        store.enqueue(job(30, "small", 2)).await.unwrap();

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .withf(|texts, model, dims| model.eq_ignore_ascii_case("small") && *dims == 2 && texts.len() == 2)
            .times(1)
            .returning(|texts, _, _| Ok(vec![vec![1.0, 0.0]; texts.len()]));
        provider
            .expect_embed()
            .withf(|texts, model, dims| model.eq_ignore_ascii_case("large") && *dims == 3 && texts.len() == 1)
            .times(1)
            .returning(|_, _, _| Err(AppError::ExternalApi("model overloaded".to_string())));

        let worker = worker(store.clone(), provider);
        assert_eq!(worker.run_once().await.unwrap(), 3);

        let status: Vec<(i64, JobStatus)> = store
            .jobs()
            .await
            .iter()
            .map(|j| (j.source_id, j.status))
            .collect();
        assert_eq!(
            status,
            vec![
                (10, JobStatus::Done),
                (20, JobStatus::Failed),
                (30, JobStatus::Done)
            ]
        );
    }

    #[tokio::test]
    async fn test_wrong_dimensions_fail_the_group() {
        let store = Arc::new(InMemoryStore::new());
        store.enqueue(job(10, "m", 3)).await.unwrap();

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .returning(|_, _, _| Ok(vec![vec![1.0, 0.0]]));

        let worker = worker(store.clone(), provider);
        worker.run_once().await.unwrap();

        let jobs = store.jobs().await;
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].last_error.as_deref().unwrap().contains("dimensions"));
    }

    #[tokio::test]
    async fn test_started_worker_drains_queue_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        for id in 0..25 {
            store.enqueue(job(id, "m", 1)).await.unwrap();
        }

        let mut provider = MockEmbeddingProvider::new();
        provider
            .expect_embed()
            .returning(|texts, _, _| Ok(vec![vec![0.5]; texts.len()]));

        let (task, handle) = worker(store.clone(), provider).start();
        for _ in 0..100 {
            if store.jobs().await.iter().all(|j| j.status == JobStatus::Done) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(store.jobs().await.iter().all(|j| j.status == JobStatus::Done));
    }
}
