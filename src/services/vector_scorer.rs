//! Embedding tier: scores candidates by semantic similarity to the user's
//! taste, adjusted for novelty, repetition and soft avoidance, then
//! diversifies the top of the list with MMR.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    config::RecommenderConfig,
    db::{EmbeddingStore, RecommendationHistory, WatchedHistory},
    error::{AppError, AppResult},
    models::{
        decade_of, AvoidancePattern, MovieCandidate, MovieDetails, MovieId, RecPick,
        ScoredCandidate, SourceType, Strategy, UserId,
    },
    services::{
        candidate_pool::CandidatePool,
        fanout::fan_out,
        mmr::{mmr_select, MmrParams},
        providers::MetadataProvider,
        taste_vector::{TasteVectorBuilder, TasteVectors},
        vector_math::{cosine_similarity, similarity_to},
    },
};

const REPEAT_GENRES: usize = 4;
const REPEAT_GENRE_WEIGHT: f32 = 0.20;
const REPEAT_DECADE_WEIGHT: f32 = 0.12;
const MAX_REPEAT_PENALTY: f32 = 0.5;
const MAX_AVOID_KEYWORDS: usize = 25;

/// Genre and decade frequencies over recently recommended and watched films
#[derive(Debug, Clone, Default)]
pub struct RepeatContext {
    genre_counts: HashMap<i64, u32>,
    decade_counts: HashMap<i32, u32>,
    total: usize,
}

impl RepeatContext {
    /// `total` counts every context film, including ones without details
    pub fn from_details<'a>(details: impl IntoIterator<Item = &'a MovieDetails>, total: usize) -> Self {
        let mut context = Self {
            total,
            ..Self::default()
        };
        for film in details {
            for id in film.genre_ids() {
                *context.genre_counts.entry(id).or_default() += 1;
            }
            if let Some(decade) = film.decade() {
                *context.decade_counts.entry(decade).or_default() += 1;
            }
        }
        context
    }

    /// 0.20 per shared genre fraction (first 4 genres) plus 0.12 per decade fraction, in [0, 0.5]
    pub fn penalty(&self, genre_ids: &[i64], decade: Option<i32>) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        let total = self.total as f32;

        let genres: f32 = genre_ids
            .iter()
            .take(REPEAT_GENRES)
            .map(|g| self.genre_counts.get(g).copied().unwrap_or(0) as f32 / total)
            .sum();
        let decade = decade
            .and_then(|d| self.decade_counts.get(&d))
            .map_or(0.0, |n| *n as f32 / total);

        (REPEAT_GENRE_WEIGHT * genres + REPEAT_DECADE_WEIGHT * decade).clamp(0.0, MAX_REPEAT_PENALTY)
    }
}

/// Recent recommendations first, then recent watches, without duplicates
pub fn repeat_context_ids(
    recent_recommended: &[MovieId],
    recent_watched: &[MovieId],
    config: &RecommenderConfig,
) -> Vec<MovieId> {
    let mut seen = HashSet::new();
    recent_recommended
        .iter()
        .take(config.recent_context_recommended)
        .chain(recent_watched)
        .copied()
        .filter(|id| seen.insert(*id))
        .take(config.recent_context_cap)
        .collect()
}

/// 1 minus the closest non-negative similarity to a recent recommendation
pub fn novelty(vector: &[f32], recent: &[Vec<f32>]) -> f32 {
    let closest = recent
        .iter()
        .map(|r| cosine_similarity(vector, r).max(0.0))
        .fold(0.0, f32::max);
    (1.0 - closest).clamp(0.0, 1.0)
}

/// Lowercased title, overview, genre names and keywords of a candidate
pub fn avoidance_text(
    candidate: &MovieCandidate,
    details: Option<&MovieDetails>,
    keywords: &[String],
) -> String {
    let mut parts: Vec<String> = Vec::new();
    let title = details.map_or(candidate.title.as_str(), |d| d.title.as_str());
    if !title.is_empty() {
        parts.push(title.to_string());
    }
    if let Some(overview) = details.and_then(|d| d.overview.as_deref()) {
        parts.push(overview.to_string());
    }
    if let Some(details) = details.filter(|d| !d.genres.is_empty()) {
        let names: Vec<&str> = details.genres.iter().map(|g| g.name.as_str()).collect();
        parts.push(format!("genres: {}", names.join(", ")));
    }
    if !keywords.is_empty() {
        let names: Vec<&str> = keywords
            .iter()
            .take(MAX_AVOID_KEYWORDS)
            .map(String::as_str)
            .collect();
        parts.push(format!("keywords: {}", names.join(", ")));
    }
    parts.join("\n").to_lowercase()
}

/// Sum of `-weight` over active patterns with a keyword in `text`, and the ids that fired
pub fn soft_avoid_penalty(
    text: &str,
    patterns: &[AvoidancePattern],
    now: DateTime<Utc>,
) -> (f32, Vec<String>) {
    if text.is_empty() {
        return (0.0, Vec::new());
    }
    let text = text.to_lowercase();

    let mut penalty = 0.0;
    let mut triggered = Vec::new();
    for pattern in patterns.iter().filter(|p| p.is_active(now)) {
        if pattern.matches(&text) {
            penalty += -pattern.weight;
            triggered.push(pattern.id.clone());
        }
    }
    (penalty, triggered)
}

/// Everything the scorer needs to know about one embedded candidate
#[derive(Debug, Clone)]
pub struct CandidateFeatures {
    pub movie_id: MovieId,
    pub genre_ids: Vec<i64>,
    pub decade: Option<i32>,
    pub avoidance_text: String,
}

/// Inputs shared by every candidate of one pass
pub struct ScoringContext<'a> {
    pub taste: &'a TasteVectors,
    pub recent_vectors: &'a [Vec<f32>],
    pub repeat: &'a RepeatContext,
    pub patterns: &'a [AvoidancePattern],
    pub now: DateTime<Utc>,
}

pub fn score_candidate(
    features: &CandidateFeatures,
    vector: &[f32],
    ctx: &ScoringContext<'_>,
) -> ScoredCandidate {
    let sim_like = similarity_to(vector, ctx.taste.liked());
    let sim_dislike = similarity_to(vector, ctx.taste.disliked());
    let novelty = novelty(vector, ctx.recent_vectors);
    let repeat_penalty = ctx.repeat.penalty(&features.genre_ids, features.decade);
    let (avoid_penalty, triggered) =
        soft_avoid_penalty(&features.avoidance_text, ctx.patterns, ctx.now);

    ScoredCandidate::new(
        features.movie_id,
        sim_like,
        sim_dislike,
        novelty,
        repeat_penalty,
        avoid_penalty,
        triggered,
    )
}

/// Minimum embedded candidates for the tier to answer
pub fn embedding_gate(count: usize, config: &RecommenderConfig) -> usize {
    config.min_vector_candidates.max(count * 2)
}

pub fn to_pick(scored: ScoredCandidate) -> RecPick {
    RecPick {
        movie_id: scored.movie_id,
        strategy: Strategy::from_similarity(scored.sim_like, scored.novelty),
        score: scored.score,
        reason: scored.debug_line(),
        triggered_avoid_ids: scored.triggered_avoid_ids,
    }
}

pub struct VectorTier {
    embeddings: Arc<dyn EmbeddingStore>,
    watched: Arc<dyn WatchedHistory>,
    history: Arc<dyn RecommendationHistory>,
    metadata: Arc<dyn MetadataProvider>,
    taste: TasteVectorBuilder,
    config: RecommenderConfig,
}

impl VectorTier {
    pub fn new(
        embeddings: Arc<dyn EmbeddingStore>,
        watched: Arc<dyn WatchedHistory>,
        history: Arc<dyn RecommendationHistory>,
        metadata: Arc<dyn MetadataProvider>,
        config: RecommenderConfig,
    ) -> Self {
        let taste = TasteVectorBuilder::new(watched.clone(), embeddings.clone(), &config);
        Self {
            embeddings,
            watched,
            history,
            metadata,
            taste,
            config,
        }
    }

    /// Up to `count` picks, or none when too few candidates are embedded
    pub async fn recommend(
        &self,
        user_id: UserId,
        pool: &CandidatePool,
        count: usize,
        patterns: &[AvoidancePattern],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<RecPick>> {
        if count == 0 || pool.candidates.is_empty() {
            return Ok(Vec::new());
        }

        let candidate_ids: Vec<MovieId> = pool.candidates.iter().map(|c| c.id).collect();
        let vectors = self
            .embeddings
            .get_embeddings(user_id, SourceType::FilmMeta, &candidate_ids)
            .await?;

        let required = embedding_gate(count, &self.config);
        tracing::info!(
            user_id,
            candidates = candidate_ids.len(),
            embeddings_found = vectors.len(),
            required,
            "Vector tier candidate embeddings"
        );
        if vectors.len() < required {
            tracing::warn!(
                user_id,
                embeddings_found = vectors.len(),
                required,
                "Not enough candidate embeddings, declining"
            );
            return Ok(Vec::new());
        }

        let taste = self.taste.build(user_id).await?;

        let recent_ids = self
            .history
            .recent_recommended_movie_ids(
                user_id,
                self.config.recent_days,
                self.config.recent_recommended_limit,
            )
            .await?;
        let recent_vectors: Vec<Vec<f32>> = self
            .embeddings
            .get_embeddings(user_id, SourceType::FilmMeta, &recent_ids)
            .await?
            .into_values()
            .collect();

        let recent_watched = self
            .watched
            .recent_watched_movie_ids(user_id, self.config.recent_context_watched)
            .await?;
        let context_ids = repeat_context_ids(&recent_ids, &recent_watched, &self.config);
        let repeat = self.repeat_context(&context_ids).await;

        let embedded: Vec<&MovieCandidate> = pool
            .candidates
            .iter()
            .filter(|c| vectors.contains_key(&c.id))
            .collect();
        let features = self.candidate_features(&embedded).await;

        let ctx = ScoringContext {
            taste: &taste,
            recent_vectors: &recent_vectors,
            repeat: &repeat,
            patterns,
            now,
        };
        let scored: Vec<ScoredCandidate> = features
            .iter()
            .filter_map(|f| vectors.get(&f.movie_id).map(|v| score_candidate(f, v, &ctx)))
            .collect();

        let params = MmrParams {
            lambda: self.config.mmr_lambda,
            missing_redundancy: self.config.mmr_missing_redundancy,
        };
        let selected = mmr_select(&scored, &vectors, count, params);
        for s in &selected {
            tracing::debug!(user_id, movie_id = s.movie_id, score = s.score, detail = %s.debug_line(), "Selected");
        }

        Ok(selected.into_iter().map(to_pick).collect())
    }

    async fn repeat_context(&self, context_ids: &[MovieId]) -> RepeatContext {
        let metadata = self.metadata.clone();
        let details = fan_out(context_ids, self.config.fanout_limit, move |id| {
            let metadata = metadata.clone();
            async move { metadata.details(id).await }
        })
        .await;

        RepeatContext::from_details(
            details.iter().filter_map(|(_, d)| d.as_ref()),
            context_ids.len(),
        )
    }

    /// Details and keywords per candidate; missing details fall back to list data
    async fn candidate_features(&self, candidates: &[&MovieCandidate]) -> Vec<CandidateFeatures> {
        let ids: Vec<MovieId> = candidates.iter().map(|c| c.id).collect();
        let metadata = self.metadata.clone();
        let hydrated = fan_out(&ids, self.config.fanout_limit, move |id| {
            let metadata = metadata.clone();
            async move {
                let (details, keywords) = tokio::join!(metadata.details(id), metadata.keywords(id));
                let details = details
                    .map_err(|e| tracing::warn!(movie_id = id, error = %e, "Candidate details failed"))
                    .ok();
                let keywords = keywords.unwrap_or_default();
                Ok::<_, AppError>((details, keywords))
            }
        })
        .await;

        candidates
            .iter()
            .zip(hydrated)
            .map(|(candidate, (_, result))| {
                let (details, keywords) = result.unwrap_or((None, Vec::new()));
                let genre_ids = details
                    .as_ref()
                    .map(|d| d.genre_ids())
                    .filter(|g| !g.is_empty())
                    .unwrap_or_else(|| candidate.genre_ids.clone());
                let decade = details
                    .as_ref()
                    .and_then(|d| d.decade())
                    .or_else(|| candidate.year.map(decade_of));

                CandidateFeatures {
                    movie_id: candidate.id,
                    genre_ids,
                    decade,
                    avoidance_text: avoidance_text(candidate, details.as_ref(), &keywords),
                }
            })
            .collect()
    }
}
