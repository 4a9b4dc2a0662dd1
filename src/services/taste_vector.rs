use std::{collections::HashMap, sync::Arc};

use crate::{
    config::RecommenderConfig,
    db::{EmbeddingStore, WatchedHistory},
    error::AppResult,
    models::{RatedWatch, SourceType, UserId},
    services::vector_math::weighted_average,
};

/// Liked and disliked reference vectors of one user
///
/// Either side is `None` when no qualifying embedding exists, and then
/// contributes zero similarity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TasteVectors {
    pub liked: Option<Vec<f32>>,
    pub disliked: Option<Vec<f32>>,
}

impl TasteVectors {
    pub fn liked(&self) -> Option<&[f32]> {
        self.liked.as_deref()
    }

    pub fn disliked(&self) -> Option<&[f32]> {
        self.disliked.as_deref()
    }
}

pub struct TasteVectorBuilder {
    watched: Arc<dyn WatchedHistory>,
    embeddings: Arc<dyn EmbeddingStore>,
    like_threshold: f32,
    dislike_threshold: f32,
    max_films: i64,
    review_weight: f32,
    film_meta_weight: f32,
}

impl TasteVectorBuilder {
    pub fn new(
        watched: Arc<dyn WatchedHistory>,
        embeddings: Arc<dyn EmbeddingStore>,
        config: &RecommenderConfig,
    ) -> Self {
        Self {
            watched,
            embeddings,
            like_threshold: config.like_threshold,
            dislike_threshold: config.dislike_threshold,
            max_films: config.taste_max_films,
            review_weight: config.review_weight,
            film_meta_weight: config.film_meta_weight,
        }
    }

    pub async fn build(&self, user_id: UserId) -> AppResult<TasteVectors> {
        let rated = self.watched.recent_rated(user_id, self.max_films).await?;

        let (liked, disliked): (Vec<RatedWatch>, Vec<RatedWatch>) = rated
            .into_iter()
            .filter(|r| r.rating >= self.like_threshold || r.rating <= self.dislike_threshold)
            .partition(|r| r.rating >= self.like_threshold);

        let vectors = TasteVectors {
            liked: self.aggregate(user_id, &liked).await,
            disliked: self.aggregate(user_id, &disliked).await,
        };

        tracing::debug!(
            user_id,
            liked_films = liked.len(),
            disliked_films = disliked.len(),
            has_liked = vectors.liked.is_some(),
            has_disliked = vectors.disliked.is_some(),
            "Built taste vectors"
        );
        Ok(vectors)
    }

    /// Review embeddings, keyed by watched item, weigh more than film metadata ones
    async fn aggregate(&self, user_id: UserId, items: &[RatedWatch]) -> Option<Vec<f32>> {
        if items.is_empty() {
            return None;
        }

        let watched_ids: Vec<i64> = items.iter().map(|r| r.watched_id).collect();
        let movie_ids: Vec<i64> = items.iter().map(|r| r.movie_id).collect();

        let reviews = self
            .lookup(user_id, SourceType::Review, &watched_ids)
            .await;
        let metadata = self
            .lookup(user_id, SourceType::FilmMeta, &movie_ids)
            .await;

        let contributions = watched_ids
            .iter()
            .filter_map(|id| reviews.get(id))
            .map(|v| (v.as_slice(), self.review_weight))
            .chain(
                movie_ids
                    .iter()
                    .filter_map(|id| metadata.get(id))
                    .map(|v| (v.as_slice(), self.film_meta_weight)),
            );

        weighted_average(contributions)
    }

    async fn lookup(
        &self,
        user_id: UserId,
        source_type: SourceType,
        ids: &[i64],
    ) -> HashMap<i64, Vec<f32>> {
        match self.embeddings.get_embeddings(user_id, source_type, ids).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(user_id, %source_type, error = %e, "Embedding lookup failed");
                HashMap::new()
            }
        }
    }
}
