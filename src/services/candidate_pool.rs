use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    config::RecommenderConfig,
    db::{RecommendationHistory, WatchedHistory},
    error::{AppError, AppResult},
    models::{MovieCandidate, MovieId, UserId},
    services::{fanout::fan_out, providers::MetadataProvider},
};

/// Candidate pool of one recommendation pass
#[derive(Debug, Clone, Default)]
pub struct CandidatePool {
    pub seeds: Vec<MovieId>,
    /// Unseen candidates in first-seen order
    pub candidates: Vec<MovieCandidate>,
}

/// Merges ranked lists into one entry per movie id.
///
/// Order follows the first occurrence of each id; on a duplicate the entry
/// with the higher `vote + popularity / 100` wins.
pub fn dedupe_candidates<I>(lists: I) -> Vec<MovieCandidate>
where
    I: IntoIterator<Item = Vec<MovieCandidate>>,
{
    let mut position: HashMap<MovieId, usize> = HashMap::new();
    let mut merged: Vec<MovieCandidate> = Vec::new();

    for candidate in lists.into_iter().flatten() {
        match position.get(&candidate.id) {
            Some(&idx) => {
                if candidate.dedupe_quality() > merged[idx].dedupe_quality() {
                    merged[idx] = candidate;
                }
            }
            None => {
                position.insert(candidate.id, merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

/// Drops every candidate the user has watched, was recently shown, or seeded from
pub fn exclude_known(
    candidates: Vec<MovieCandidate>,
    watched: &HashSet<MovieId>,
    recently_recommended: &HashSet<MovieId>,
    seeds: &[MovieId],
) -> Vec<MovieCandidate> {
    let seeds: HashSet<MovieId> = seeds.iter().copied().collect();
    candidates
        .into_iter()
        .filter(|c| {
            !watched.contains(&c.id) && !recently_recommended.contains(&c.id) && !seeds.contains(&c.id)
        })
        .collect()
}

pub struct CandidatePoolBuilder {
    watched: Arc<dyn WatchedHistory>,
    history: Arc<dyn RecommendationHistory>,
    metadata: Arc<dyn MetadataProvider>,
    config: RecommenderConfig,
}

impl CandidatePoolBuilder {
    pub fn new(
        watched: Arc<dyn WatchedHistory>,
        history: Arc<dyn RecommendationHistory>,
        metadata: Arc<dyn MetadataProvider>,
        config: RecommenderConfig,
    ) -> Self {
        Self {
            watched,
            history,
            metadata,
            config,
        }
    }

    /// Favorite movies to expand from, best first
    ///
    /// Users with few well-rated films fall back to their top films by any rating.
    pub async fn select_seeds(&self, user_id: UserId) -> AppResult<Vec<MovieId>> {
        let favorites = self
            .watched
            .top_rated_movie_ids(user_id, self.config.like_threshold, self.config.seeds_limit)
            .await?;
        if favorites.len() >= self.config.min_rated_seeds {
            return Ok(favorites);
        }

        tracing::debug!(
            user_id,
            favorites = favorites.len(),
            "Too few rated favorites, using top films by any rating"
        );
        self.watched
            .fallback_top_movie_ids(user_id, self.config.seeds_limit)
            .await
    }

    pub async fn build(&self, user_id: UserId) -> AppResult<CandidatePool> {
        let seeds = self.select_seeds(user_id).await?;
        if seeds.is_empty() {
            return Ok(CandidatePool::default());
        }

        let watched = self.watched.watched_movie_ids(user_id).await?;
        let recent = self
            .history
            .recently_recommended_set(user_id, self.config.recent_days)
            .await?;

        let expand = &seeds[..seeds.len().min(self.config.expand_seeds)];
        let lists = self.expand_seeds(expand).await;
        let merged = dedupe_candidates(lists);
        let merged_count = merged.len();
        let candidates = exclude_known(merged, &watched, &recent, &seeds);

        tracing::info!(
            user_id,
            seeds = seeds.len(),
            expanded = expand.len(),
            merged = merged_count,
            candidates = candidates.len(),
            "Built candidate pool"
        );

        Ok(CandidatePool { seeds, candidates })
    }

    /// "Similar" and "related" lists per seed; a failed call contributes nothing
    async fn expand_seeds(&self, seeds: &[MovieId]) -> Vec<Vec<MovieCandidate>> {
        let metadata = self.metadata.clone();
        let results = fan_out(seeds, self.config.fanout_limit, move |seed| {
            let metadata = metadata.clone();
            async move {
                let (similar, related) = tokio::join!(metadata.similar(seed), metadata.related(seed));
                let mut list = Vec::new();
                for result in [similar, related] {
                    match result {
                        Ok(candidates) => list.extend(candidates),
                        Err(e) => {
                            tracing::warn!(movie_id = seed, error = %e, "Seed expansion call failed")
                        }
                    }
                }
                Ok::<_, AppError>(list)
            }
        })
        .await;

        results
            .into_iter()
            .map(|(_, list)| list.unwrap_or_default())
            .collect()
    }
}
