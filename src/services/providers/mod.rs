//! Outbound collaborators of the recommendation core.
//!
//! Both traits surface network and HTTP failures as
//! [`AppError::ExternalApi`](crate::error::AppError::ExternalApi) or
//! [`AppError::HttpClient`](crate::error::AppError::HttpClient); callers on
//! the request path treat those as an empty contribution.
use crate::{
    error::AppResult,
    models::{MovieCandidate, MovieDetails, MovieId},
};

pub mod openai;
pub mod tmdb;

pub use openai::OpenAiEmbeddingProvider;
pub use tmdb::TmdbProvider;

/// Movie metadata source
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn search(&self, title: &str, year: Option<i32>) -> AppResult<Vec<MovieCandidate>>;

    async fn details(&self, id: MovieId) -> AppResult<MovieDetails>;

    async fn keywords(&self, id: MovieId) -> AppResult<Vec<String>>;

    /// Movies similar to `id`, ranked by the provider
    async fn similar(&self, id: MovieId) -> AppResult<Vec<MovieCandidate>>;

    /// Movies recommended alongside `id`, ranked by the provider
    async fn related(&self, id: MovieId) -> AppResult<Vec<MovieCandidate>>;
}

/// Text embedding source
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String], model: &str, dimensions: i32)
        -> AppResult<Vec<Vec<f32>>>;
}
