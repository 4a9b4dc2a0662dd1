use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{
    config::{EmbeddingSettings, RecommenderConfig},
    db::Stores,
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{
        embedding_text::EmbeddingProducer, providers::MetadataProvider,
        recommendations::Recommender, taste_profile::TasteProfileBuilder,
    },
};

pub mod avoids;
pub mod embeddings;
pub mod profile;
pub mod recommendations;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub recommender: Arc<Recommender>,
    pub producer: Arc<EmbeddingProducer>,
    pub profile_builder: Arc<TasteProfileBuilder>,
    pub stores: Stores,
    /// Minimum seconds between two recommendation requests of one user
    pub recommend_interval_secs: i64,
}

impl AppState {
    pub fn new(
        stores: Stores,
        metadata: Arc<dyn MetadataProvider>,
        embedding: EmbeddingSettings,
        config: RecommenderConfig,
        recommend_interval_secs: i64,
    ) -> Self {
        let producer = EmbeddingProducer::new(
            stores.jobs.clone(),
            stores.embeddings.clone(),
            stores.watched.clone(),
            stores.profiles.clone(),
            metadata.clone(),
            embedding,
            config.fanout_limit,
        );
        let profile_builder = TasteProfileBuilder::new(
            stores.watched.clone(),
            stores.profiles.clone(),
            metadata.clone(),
            &config,
        );
        let recommender = Recommender::new(
            stores.watched.clone(),
            stores.history.clone(),
            stores.profiles.clone(),
            stores.avoidance.clone(),
            stores.embeddings.clone(),
            metadata,
            config,
        );

        Self {
            recommender: Arc::new(recommender),
            producer: Arc::new(producer),
            profile_builder: Arc::new(profile_builder),
            stores,
            recommend_interval_secs,
        }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/recommendations", post(recommendations::recommend))
        .route("/embeddings/jobs", post(embeddings::enqueue_job))
        .route("/embeddings/backfill", post(embeddings::backfill))
        .route("/embeddings/warmup", post(embeddings::warm_up))
        .route(
            "/users/:user_id/avoids",
            get(avoids::get_avoids).put(avoids::put_avoids),
        )
        .route(
            "/users/:user_id/profile",
            get(profile::get_profile).post(profile::rebuild_profile),
        )
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
