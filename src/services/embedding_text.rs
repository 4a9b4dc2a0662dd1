//! Embedding texts and the producer side of the job queue.

use std::{collections::HashSet, sync::Arc};

use crate::{
    config::EmbeddingSettings,
    db::{EmbeddingStore, JobQueue, TasteProfileStore, WatchedHistory},
    error::{AppError, AppResult},
    models::{MovieCandidate, MovieDetails, MovieId, NewEmbeddingJob, SourceType, UserId},
    services::{fanout::fan_out, providers::MetadataProvider},
};

const META_KEYWORDS: usize = 20;

pub fn build_review_text(
    title: &str,
    year: Option<i32>,
    rating: Option<f32>,
    review: Option<&str>,
) -> String {
    let mut parts = vec![match year {
        Some(year) => format!("Movie: {} ({})", title, year),
        None => format!("Movie: {}", title),
    }];
    if let Some(rating) = rating {
        parts.push(format!("User rating: {}/5", rating));
    }
    if let Some(review) = review.map(str::trim).filter(|r| !r.is_empty()) {
        parts.push(format!("User review:\n{}", review));
    }
    parts.join("\n").trim().to_string()
}

pub fn build_film_meta_text(details: &MovieDetails, keywords: &[String]) -> String {
    let mut parts = vec![match details.year {
        Some(year) => format!("Title: {} ({})", details.title, year),
        None => format!("Title: {}", details.title),
    }];
    if !details.genres.is_empty() {
        let names: Vec<&str> = details.genres.iter().map(|g| g.name.as_str()).collect();
        parts.push(format!("Genres: {}", names.join(", ")));
    }
    if !keywords.is_empty() {
        parts.push(format!(
            "Keywords: {}",
            keywords[..keywords.len().min(META_KEYWORDS)].join(", ")
        ));
    }
    if let Some(runtime) = details.runtime.filter(|r| *r > 0) {
        parts.push(format!("Runtime: {} min", runtime));
    }
    if let Some(overview) = details.overview.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        parts.push(format!("Overview:\n{}", overview));
    }
    parts.join("\n").trim().to_string()
}

/// Turns user content into embedding jobs stamped with the configured model
pub struct EmbeddingProducer {
    queue: Arc<dyn JobQueue>,
    embeddings: Arc<dyn EmbeddingStore>,
    watched: Arc<dyn WatchedHistory>,
    profiles: Arc<dyn TasteProfileStore>,
    metadata: Arc<dyn MetadataProvider>,
    settings: EmbeddingSettings,
    fanout_limit: usize,
}

impl EmbeddingProducer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        embeddings: Arc<dyn EmbeddingStore>,
        watched: Arc<dyn WatchedHistory>,
        profiles: Arc<dyn TasteProfileStore>,
        metadata: Arc<dyn MetadataProvider>,
        settings: EmbeddingSettings,
        fanout_limit: usize,
    ) -> Self {
        Self {
            queue,
            embeddings,
            watched,
            profiles,
            metadata,
            settings,
            fanout_limit,
        }
    }

    pub async fn enqueue_text(
        &self,
        user_id: UserId,
        source_type: SourceType,
        source_id: i64,
        text: &str,
    ) -> AppResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidInput(
                "Embedding text cannot be empty".to_string(),
            ));
        }

        self.queue
            .enqueue(NewEmbeddingJob {
                user_id,
                source_type,
                source_id,
                content_text: text.to_string(),
                model: self.settings.model.clone(),
                dimensions: self.settings.dimensions,
            })
            .await?;

        tracing::debug!(user_id, %source_type, source_id, "Enqueued embedding job");
        Ok(())
    }

    /// Metadata texts for `movie_ids`; films whose details fail are left out
    async fn film_meta_texts(&self, movie_ids: &[MovieId]) -> Vec<(MovieId, String)> {
        let metadata = self.metadata.clone();
        let texts = fan_out(movie_ids, self.fanout_limit, move |id| {
            let metadata = metadata.clone();
            async move {
                let (details, keywords) = tokio::join!(metadata.details(id), metadata.keywords(id));
                Ok::<_, AppError>(build_film_meta_text(&details?, &keywords.unwrap_or_default()))
            }
        })
        .await;

        texts
            .into_iter()
            .filter_map(|(id, text)| text.filter(|t| !t.is_empty()).map(|t| (id, t)))
            .collect()
    }

    /// Enqueues metadata and review jobs for the user's latest films, plus the profile summary
    pub async fn backfill_user(&self, user_id: UserId, limit: i64) -> AppResult<usize> {
        let films = self.watched.list_watched(user_id, limit).await?;

        let mut movie_ids = Vec::new();
        let mut seen = HashSet::new();
        for film in &films {
            if seen.insert(film.movie_id) {
                movie_ids.push(film.movie_id);
            }
        }

        let mut enqueued = 0;
        for (movie_id, text) in self.film_meta_texts(&movie_ids).await {
            self.enqueue_text(user_id, SourceType::FilmMeta, movie_id, &text)
                .await?;
            enqueued += 1;
        }

        for film in &films {
            let has_review = film.review.as_deref().is_some_and(|r| !r.trim().is_empty());
            if film.rating.is_none() && !has_review {
                continue;
            }
            let text = build_review_text(&film.title, film.year, film.rating, film.review.as_deref());
            self.enqueue_text(user_id, SourceType::Review, film.id, &text)
                .await?;
            enqueued += 1;
        }

        if let Some(summary) = self.profiles.get_summary(user_id).await? {
            self.enqueue_text(user_id, SourceType::Profile, user_id, &summary)
                .await?;
            enqueued += 1;
        }

        tracing::info!(user_id, films = films.len(), enqueued, "Backfill enqueued");
        Ok(enqueued)
    }

    /// Enqueues metadata jobs for the best candidates that have no embedding yet
    pub async fn warm_up_candidates(
        &self,
        user_id: UserId,
        candidates: &[MovieCandidate],
        limit: usize,
    ) -> AppResult<usize> {
        let ids: Vec<MovieId> = candidates.iter().map(|c| c.id).collect();
        let existing = self
            .embeddings
            .get_embeddings(user_id, SourceType::FilmMeta, &ids)
            .await?;

        let mut missing: Vec<&MovieCandidate> = candidates
            .iter()
            .filter(|c| !existing.contains_key(&c.id))
            .collect();
        missing.sort_by(|a, b| b.dedupe_quality().total_cmp(&a.dedupe_quality()));
        missing.truncate(limit);

        let missing_ids: Vec<MovieId> = missing.iter().map(|c| c.id).collect();
        let mut enqueued = 0;
        for (movie_id, text) in self.film_meta_texts(&missing_ids).await {
            self.enqueue_text(user_id, SourceType::FilmMeta, movie_id, &text)
                .await?;
            enqueued += 1;
        }

        tracing::info!(
            user_id,
            candidates = candidates.len(),
            already_embedded = existing.len(),
            enqueued,
            "Candidate warm-up enqueued"
        );
        Ok(enqueued)
    }
}
