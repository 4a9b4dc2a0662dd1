use std::sync::Arc;

use sqlx::PgPool;

pub mod embeddings;
pub mod history;
pub mod memory;
pub mod postgres;
pub mod rate_limit;
pub mod redis;
pub mod taste_profile;
pub mod watched;

pub use embeddings::{EmbeddingStore, JobQueue, PgEmbeddingRepository};
pub use history::{PgHistoryRepository, RecommendationHistory};
pub use memory::InMemoryStore;
pub use postgres::{create_pool, run_migrations};
pub use rate_limit::{PgRateLimiter, RateDecision, RateLimiter};
pub use redis::{create_redis_client, Cache, CacheKey, CacheWriterHandle};
pub use taste_profile::{AvoidancePatternStore, PgTasteProfileRepository, TasteProfileStore};
pub use watched::{PgWatchedRepository, WatchedHistory};

#[cfg(test)]
pub use embeddings::{MockEmbeddingStore, MockJobQueue};
#[cfg(test)]
pub use history::MockRecommendationHistory;
#[cfg(test)]
pub use rate_limit::MockRateLimiter;
#[cfg(test)]
pub use taste_profile::{MockAvoidancePatternStore, MockTasteProfileStore};
#[cfg(test)]
pub use watched::MockWatchedHistory;

/// Every store contract the services depend on, behind one backend
#[derive(Clone)]
pub struct Stores {
    pub watched: Arc<dyn WatchedHistory>,
    pub history: Arc<dyn RecommendationHistory>,
    pub profiles: Arc<dyn TasteProfileStore>,
    pub avoidance: Arc<dyn AvoidancePatternStore>,
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let profiles = Arc::new(PgTasteProfileRepository::new(pool.clone()));
        let embeddings = Arc::new(PgEmbeddingRepository::new(pool.clone()));
        Self {
            watched: Arc::new(PgWatchedRepository::new(pool.clone())),
            history: Arc::new(PgHistoryRepository::new(pool.clone())),
            profiles: profiles.clone(),
            avoidance: profiles,
            embeddings: embeddings.clone(),
            jobs: embeddings,
            rate_limiter: Arc::new(PgRateLimiter::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            watched: store.clone(),
            history: store.clone(),
            profiles: store.clone(),
            avoidance: store.clone(),
            embeddings: store.clone(),
            jobs: store.clone(),
            rate_limiter: store,
        }
    }
}
