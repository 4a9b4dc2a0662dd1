use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::RecommenderConfig,
    db::{
        AvoidancePatternStore, EmbeddingStore, RecommendationHistory, TasteProfileStore,
        WatchedHistory,
    },
    error::AppResult,
    models::{AvoidanceProfile, RecPick, Recommendation, Tier, UserId},
    services::{
        candidate_pool::{CandidatePool, CandidatePoolBuilder},
        heuristic::HeuristicTier,
        providers::MetadataProvider,
        vector_scorer::VectorTier,
    },
};

/// Runs one recommendation pass: pool, embedding tier, heuristic fallback
pub struct Recommender {
    pool: CandidatePoolBuilder,
    vector: VectorTier,
    heuristic: HeuristicTier,
    avoidance: Arc<dyn AvoidancePatternStore>,
}

impl Recommender {
    pub fn new(
        watched: Arc<dyn WatchedHistory>,
        history: Arc<dyn RecommendationHistory>,
        profiles: Arc<dyn TasteProfileStore>,
        avoidance: Arc<dyn AvoidancePatternStore>,
        embeddings: Arc<dyn EmbeddingStore>,
        metadata: Arc<dyn MetadataProvider>,
        config: RecommenderConfig,
    ) -> Self {
        Self {
            pool: CandidatePoolBuilder::new(
                watched.clone(),
                history.clone(),
                metadata.clone(),
                config.clone(),
            ),
            heuristic: HeuristicTier::new(metadata.clone(), profiles, &config),
            vector: VectorTier::new(embeddings, watched, history, metadata, config),
            avoidance,
        }
    }

    pub async fn candidate_pool(&self, user_id: UserId) -> AppResult<CandidatePool> {
        self.pool.build(user_id).await
    }

    pub async fn recommend(&self, user_id: UserId, count: usize) -> AppResult<Recommendation> {
        self.recommend_at(user_id, count, Utc::now()).await
    }

    pub async fn recommend_at(
        &self,
        user_id: UserId,
        count: usize,
        now: DateTime<Utc>,
    ) -> AppResult<Recommendation> {
        let pool = self.pool.build(user_id).await?;

        let avoidance = match self.avoidance.get_avoidance(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load avoidance patterns");
                AvoidanceProfile::default()
            }
        };

        let vector_picks = match self
            .vector
            .recommend(user_id, &pool, count, &avoidance.patterns, now)
            .await
        {
            Ok(picks) => picks,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Vector tier failed, falling back");
                Vec::new()
            }
        };

        if !vector_picks.is_empty() {
            self.apply_cooldowns(user_id, avoidance, &vector_picks, now)
                .await;
            tracing::info!(user_id, picks = vector_picks.len(), "Recommended from vector tier");
            return Ok(Recommendation {
                tier: Tier::Vector,
                picks: vector_picks,
            });
        }

        let picks = self.heuristic.recommend(user_id, &pool, count).await?;
        tracing::info!(user_id, picks = picks.len(), "Recommended from heuristic tier");
        Ok(Recommendation {
            tier: Tier::Heuristic,
            picks,
        })
    }

    /// Starts the cooldown of every pattern that fired on a shown pick
    async fn apply_cooldowns(
        &self,
        user_id: UserId,
        mut profile: AvoidanceProfile,
        picks: &[RecPick],
        now: DateTime<Utc>,
    ) {
        let fired = picks
            .iter()
            .flat_map(|p| p.triggered_avoid_ids.iter().map(String::as_str));
        let changed = profile.mark_triggered(fired, now);
        if changed == 0 {
            return;
        }

        match self.avoidance.set_avoidance(user_id, &profile).await {
            Ok(()) => tracing::info!(user_id, patterns = changed, "Avoidance cooldowns started"),
            Err(e) => tracing::warn!(user_id, error = %e, "Failed to store avoidance cooldowns"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::Duration;

    use crate::db::InMemoryStore;
    use crate::models::{
        AvoidancePattern, Genre, MovieCandidate, MovieDetails, MovieId, SourceType, WatchedFilm,
    };
    use crate::services::providers::MockMetadataProvider;

    const USER: UserId = 1;
    const CORPORATE: MovieId = 110;

    fn candidate(id: MovieId) -> MovieCandidate {
        MovieCandidate {
            id,
            title: format!("Movie {}", id),
            year: Some(2012),
            popularity: Some(30.0),
            vote_average: Some(7.0),
            genre_ids: vec![18],
            original_language: Some("en".to_string()),
        }
    }

    fn details(id: MovieId) -> MovieDetails {
        let overview = if id == CORPORATE {
            "A hostile corporate takeover"
        } else {
            "A family drama"
        };
        MovieDetails {
            id,
            title: format!("Movie {}", id),
            year: Some(2012),
            runtime: Some(100),
            genres: vec![Genre {
                id: 18,
                name: "Drama".to_string(),
            }],
            overview: Some(overview.to_string()),
        }
    }

    fn metadata() -> MockMetadataProvider {
        let mut metadata = MockMetadataProvider::new();
        metadata.expect_similar().returning(|_| {
            let mut list: Vec<MovieCandidate> = (101..=120).map(candidate).collect();
            list.push(candidate(1));
            Ok(list)
        });
        metadata.expect_related().returning(|_| Ok(vec![]));
        metadata.expect_details().returning(|id| Ok(details(id)));
        metadata.expect_keywords().returning(|_| Ok(vec![]));
        metadata
    }

    /// Ten loved films (movies 1..=10) and movie 105 recommended yesterday
    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=10 {
            store
                .add_watched(
                    USER,
                    WatchedFilm {
                        id,
                        movie_id: id,
                        title: format!("Movie {}", id),
                        year: Some(2010),
                        rating: Some(4.5),
                        review: None,
                        watched_date: None,
                    },
                )
                .await;
        }
        store
            .add_recommended(USER, &[105], Utc::now() - Duration::days(1))
            .await;
        store
    }

    fn recommender(store: Arc<InMemoryStore>) -> Recommender {
        Recommender::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(metadata()),
            RecommenderConfig::default(),
        )
    }

    fn assert_excluded(picks: &[RecPick]) {
        let excluded: HashSet<MovieId> = (1..=10).chain([105]).collect();
        assert!(picks.iter().all(|p| !excluded.contains(&p.movie_id)));
    }

    #[tokio::test]
    async fn test_falls_back_to_heuristic_without_embeddings() {
        let store = seeded_store().await;

        let rec = recommender(store).recommend(USER, 3).await.unwrap();

        assert_eq!(rec.tier, Tier::Heuristic);
        assert!(!rec.picks.is_empty());
        assert_excluded(&rec.picks);
    }

    #[tokio::test]
    async fn test_vector_tier_answers_and_starts_cooldown() {
        let store = seeded_store().await;
        for id in 1..=10 {
            store
                .upsert_embedding(USER, SourceType::FilmMeta, id, "liked", &[1.0, 0.0])
                .await
                .unwrap();
        }
        for id in 101..=120 {
            let vector: [f32; 2] = if id == CORPORATE { [1.0, 0.0] } else { [0.0, 1.0] };
            store
                .upsert_embedding(USER, SourceType::FilmMeta, id, "candidate", &vector)
                .await
                .unwrap();
        }
        store
            .set_avoidance(
                USER,
                &AvoidanceProfile {
                    version: 1,
                    patterns: vec![AvoidancePattern {
                        id: "corp".to_string(),
                        label: "Corporate dramas".to_string(),
                        keywords: vec!["corporate".to_string()],
                        weight: -0.35,
                        confidence: 0.8,
                        cooldown_days: 14,
                        last_triggered: None,
                    }],
                },
            )
            .await
            .unwrap();

        let now = Utc::now();
        let rec = recommender(store.clone())
            .recommend_at(USER, 3, now)
            .await
            .unwrap();

        assert_eq!(rec.tier, Tier::Vector);
        assert_eq!(rec.picks.len(), 3);
        assert_excluded(&rec.picks);
        // still the best match after its 0.35 penalty
        assert_eq!(rec.picks[0].movie_id, CORPORATE);
        assert_eq!(rec.picks[0].triggered_avoid_ids, vec!["corp".to_string()]);

        let profile = store.get_avoidance(USER).await.unwrap();
        assert_eq!(profile.patterns[0].last_triggered, Some(now));
    }

    #[tokio::test]
    async fn test_user_without_history_gets_nothing() {
        let store = Arc::new(InMemoryStore::new());

        let rec = recommender(store).recommend(USER, 3).await.unwrap();

        assert_eq!(rec.tier, Tier::Heuristic);
        assert!(rec.picks.is_empty());
    }
}
