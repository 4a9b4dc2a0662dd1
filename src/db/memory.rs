//! In-process backend for every store contract.
//!
//! All state sits behind one `tokio::sync::Mutex`, which makes each operation
//! a single writer: claims, upserts and rate-limit checks are atomic with
//! respect to each other without row locks. Used by tests and by deployments
//! that run the recommender without Postgres.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::{
    AvoidancePatternStore, EmbeddingStore, JobQueue, RateDecision, RateLimiter,
    RecommendationHistory, TasteProfileStore, WatchedHistory,
};
use crate::{
    error::{AppError, AppResult},
    models::{
        AvoidanceProfile, EmbeddingJob, JobStatus, MovieId, NewEmbeddingJob, RatedWatch,
        Recommendation, SourceType, TasteWeights, TextEmbedding, UserId, WatchedFilm,
    },
};

type EmbeddingKey = (UserId, SourceType, i64);

#[derive(Default)]
struct State {
    watched: HashMap<UserId, Vec<WatchedFilm>>,
    recommended: HashMap<UserId, Vec<(DateTime<Utc>, MovieId)>>,
    next_recommendation_id: i64,
    weights: HashMap<UserId, TasteWeights>,
    summaries: HashMap<UserId, String>,
    avoidance: HashMap<UserId, AvoidanceProfile>,
    embeddings: HashMap<EmbeddingKey, TextEmbedding>,
    next_embedding_id: i64,
    jobs: Vec<EmbeddingJob>,
    next_job_id: i64,
    rate_limits: HashMap<(UserId, String), DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_watched(&self, user_id: UserId, film: WatchedFilm) {
        let mut state = self.state.lock().await;
        state.watched.entry(user_id).or_default().push(film);
    }

    /// Records movies as recommended at `at`, for seeding history
    pub async fn add_recommended(&self, user_id: UserId, movie_ids: &[MovieId], at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let entries = state.recommended.entry(user_id).or_default();
        entries.extend(movie_ids.iter().map(|id| (at, *id)));
    }

    pub async fn set_summary(&self, user_id: UserId, summary: &str) {
        self.state
            .lock()
            .await
            .summaries
            .insert(user_id, summary.to_string());
    }

    pub async fn jobs(&self) -> Vec<EmbeddingJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn embedding(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_id: i64,
    ) -> Option<TextEmbedding> {
        self.state
            .lock()
            .await
            .embeddings
            .get(&(user_id, source_type, source_id))
            .cloned()
    }
}

/// Watched films ordered like `watched_date DESC NULLS LAST, id DESC`
fn by_recency(films: &[WatchedFilm]) -> Vec<&WatchedFilm> {
    let mut sorted: Vec<&WatchedFilm> = films.iter().collect();
    sorted.sort_by(|a, b| {
        b.watched_date
            .is_some()
            .cmp(&a.watched_date.is_some())
            .then(b.watched_date.cmp(&a.watched_date))
            .then(b.id.cmp(&a.id))
    });
    sorted
}

/// Ratings descending with unrated last, then recency
fn by_rating(films: &[WatchedFilm]) -> Vec<&WatchedFilm> {
    let mut sorted = by_recency(films);
    sorted.sort_by(|a, b| {
        let a_rating = a.rating.unwrap_or(f32::NEG_INFINITY);
        let b_rating = b.rating.unwrap_or(f32::NEG_INFINITY);
        b_rating.total_cmp(&a_rating)
    });
    sorted
}

#[async_trait::async_trait]
impl WatchedHistory for InMemoryStore {
    async fn top_rated_movie_ids(
        &self,
        user_id: UserId,
        min_rating: f32,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let state = self.state.lock().await;
        let films = state.watched.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(by_rating(films)
            .into_iter()
            .filter(|f| f.rating.is_some_and(|r| r >= min_rating))
            .take(limit.max(0) as usize)
            .map(|f| f.movie_id)
            .collect())
    }

    async fn fallback_top_movie_ids(&self, user_id: UserId, limit: i64) -> AppResult<Vec<MovieId>> {
        let state = self.state.lock().await;
        let films = state.watched.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(by_rating(films)
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|f| f.movie_id)
            .collect())
    }

    async fn watched_movie_ids(&self, user_id: UserId) -> AppResult<HashSet<MovieId>> {
        let state = self.state.lock().await;
        Ok(state
            .watched
            .get(&user_id)
            .map(|films| films.iter().map(|f| f.movie_id).collect())
            .unwrap_or_default())
    }

    async fn recent_rated(&self, user_id: UserId, limit: i64) -> AppResult<Vec<RatedWatch>> {
        let state = self.state.lock().await;
        let films = state.watched.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(by_recency(films)
            .into_iter()
            .filter_map(|f| {
                f.rating.map(|rating| RatedWatch {
                    watched_id: f.id,
                    movie_id: f.movie_id,
                    rating,
                })
            })
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn recent_watched_movie_ids(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let state = self.state.lock().await;
        let films = state.watched.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(by_recency(films)
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|f| f.movie_id)
            .collect())
    }

    async fn list_watched(&self, user_id: UserId, limit: i64) -> AppResult<Vec<WatchedFilm>> {
        let state = self.state.lock().await;
        let mut films = state.watched.get(&user_id).cloned().unwrap_or_default();
        films.sort_by(|a, b| b.id.cmp(&a.id));
        films.truncate(limit.max(0) as usize);
        Ok(films)
    }
}

#[async_trait::async_trait]
impl RecommendationHistory for InMemoryStore {
    async fn recent_recommended_movie_ids(
        &self,
        user_id: UserId,
        days: i64,
        limit: i64,
    ) -> AppResult<Vec<MovieId>> {
        let since = Utc::now() - Duration::days(days);
        let state = self.state.lock().await;
        let mut entries: Vec<(DateTime<Utc>, MovieId)> = state
            .recommended
            .get(&user_id)
            .map(|e| e.iter().filter(|(at, _)| *at >= since).copied().collect())
            .unwrap_or_default();
        // Newest first; among equal timestamps the later insert wins, like `id DESC`
        entries.reverse();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn recently_recommended_set(
        &self,
        user_id: UserId,
        days: i64,
    ) -> AppResult<HashSet<MovieId>> {
        let since = Utc::now() - Duration::days(days);
        let state = self.state.lock().await;
        Ok(state
            .recommended
            .get(&user_id)
            .map(|e| {
                e.iter()
                    .filter(|(at, _)| *at >= since)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn record(&self, user_id: UserId, recommendation: &Recommendation) -> AppResult<i64> {
        let mut state = self.state.lock().await;
        state.next_recommendation_id += 1;
        let id = state.next_recommendation_id;
        let now = Utc::now();
        let mut seen = HashSet::new();
        let entries = state.recommended.entry(user_id).or_default();
        for pick in &recommendation.picks {
            if seen.insert(pick.movie_id) {
                entries.push((now, pick.movie_id));
            }
        }
        Ok(id)
    }
}

#[async_trait::async_trait]
impl TasteProfileStore for InMemoryStore {
    async fn get_weights(&self, user_id: UserId) -> AppResult<Option<TasteWeights>> {
        let state = self.state.lock().await;
        Ok(state
            .weights
            .get(&user_id)
            .filter(|w| !w.likes.genres.is_empty())
            .cloned())
    }

    async fn get_summary(&self, user_id: UserId) -> AppResult<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .get(&user_id)
            .filter(|s| !s.trim().is_empty())
            .cloned())
    }

    async fn set_profile(
        &self,
        user_id: UserId,
        weights: &TasteWeights,
        summary: &str,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        state.weights.insert(user_id, weights.clone());
        state.summaries.insert(user_id, summary.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl AvoidancePatternStore for InMemoryStore {
    async fn get_avoidance(&self, user_id: UserId) -> AppResult<AvoidanceProfile> {
        let state = self.state.lock().await;
        Ok(state.avoidance.get(&user_id).cloned().unwrap_or_default())
    }

    async fn set_avoidance(&self, user_id: UserId, profile: &AvoidanceProfile) -> AppResult<()> {
        self.state
            .lock()
            .await
            .avoidance
            .insert(user_id, profile.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl EmbeddingStore for InMemoryStore {
    async fn get_embeddings(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_ids: &[i64],
    ) -> AppResult<HashMap<i64, Vec<f32>>> {
        let state = self.state.lock().await;
        Ok(source_ids
            .iter()
            .filter_map(|id| {
                state
                    .embeddings
                    .get(&(user_id, source_type, *id))
                    .map(|e| (*id, e.embedding.clone()))
            })
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
        let mut state = self.state.lock().await;
        let key = (user_id, source_type, source_id);
        if let Some(existing) = state.embeddings.get_mut(&key) {
            existing.content_text = content_text.to_string();
            existing.embedding = embedding.to_vec();
            return Ok(());
        }

        state.next_embedding_id += 1;
        let id = state.next_embedding_id;
        state.embeddings.insert(
            key,
            TextEmbedding {
                id,
                user_id,
                source_type,
                source_id,
                content_text: content_text.to_string(),
                embedding: embedding.to_vec(),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobQueue for InMemoryStore {
    async fn enqueue(&self, job: NewEmbeddingJob) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let existing = state.jobs.iter_mut().find(|j| {
            j.user_id == job.user_id
                && j.source_type == job.source_type
                && j.source_id == job.source_id
        });

        if let Some(existing) = existing {
            existing.content_text = job.content_text;
            existing.model = job.model;
            existing.dimensions = job.dimensions;
            existing.status = JobStatus::Pending;
            existing.attempts = 0;
            existing.last_error = None;
            existing.locked_at = None;
            return Ok(());
        }

        state.next_job_id += 1;
        let id = state.next_job_id;
        state.jobs.push(EmbeddingJob {
            id,
            user_id: job.user_id,
            source_type: job.source_type,
            source_id: job.source_id,
            content_text: job.content_text,
            model: job.model,
            dimensions: job.dimensions,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            locked_at: None,
        });
        Ok(())
    }

    async fn claim_batch(&self, batch_size: i64) -> AppResult<Vec<EmbeddingJob>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut claimed = Vec::new();
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .take(batch_size.max(0) as usize)
        {
            job.status = JobStatus::Processing;
            job.attempts += 1;
            job.locked_at = Some(now);
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn mark_done(&self, job_id: i64) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("embedding job {}", job_id)))?;
        if job.status == JobStatus::Processing {
            job.status = JobStatus::Done;
            job.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: i64, error: &str) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("embedding job {}", job_id)))?;
        if job.status == JobStatus::Processing {
            job.status = JobStatus::Failed;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RateLimiter for InMemoryStore {
    async fn check_and_touch(
        &self,
        user_id: UserId,
        command: &str,
        interval_secs: i64,
    ) -> AppResult<RateDecision> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let key = (user_id, command.to_string());

        let decision = match state.rate_limits.get(&key) {
            None => RateDecision::Allowed,
            Some(last_used_at) => RateDecision::evaluate(*last_used_at, now, interval_secs),
        };
        if decision.is_allowed() {
            state.rate_limits.insert(key, now);
        }
        Ok(decision)
    }
}
