/// TMDB v3 metadata provider
///
/// Authenticates with the `api_key` query parameter and sends the configured
/// `language` on every call. Responses are cached in Redis: details and
/// keywords for 30 days, list endpoints for one day.
use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{MovieCandidate, MovieDetails, MovieId, TmdbKeywords, TmdbMovieDetails, TmdbPage},
    services::providers::MetadataProvider,
};
use reqwest::{Client as HttpClient, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

const DETAILS_CACHE_TTL: u64 = 30 * 24 * 3600;
const LIST_CACHE_TTL: u64 = 24 * 3600;
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
    language: String,
    cache: Cache,
}

impl TmdbProvider {
    pub fn new(
        cache: Cache,
        api_key: String,
        base_url: String,
        language: String,
        timeout: Duration,
    ) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            language,
            cache,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(AppError::ExternalApi(
                    "TMDB 401 Unauthorized: check TMDB_API_KEY".to_string(),
                ))
            }
            StatusCode::NOT_FOUND => {
                return Err(AppError::ExternalApi(format!("TMDB 404 Not Found: {}", path)))
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
                return Err(AppError::ExternalApi(format!("TMDB HTTP {}: {}", s, body)));
            }
            _ => {}
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ExternalApi(format!("TMDB invalid JSON response: {}", e)))
    }

    async fn fetch_list(&self, path: String) -> AppResult<Vec<MovieCandidate>> {
        let page: TmdbPage = self.get(&path, &[("page", "1".to_string())]).await?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|m| m.into_candidate())
            .collect())
    }
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbProvider {
    async fn search(&self, title: &str, year: Option<i32>) -> AppResult<Vec<MovieCandidate>> {
        if title.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        cached!(
            self.cache,
            CacheKey::Search(title.to_string(), year),
            LIST_CACHE_TTL,
            async move {
                let mut params = vec![
                    ("query", title.to_string()),
                    ("page", "1".to_string()),
                    ("include_adult", "false".to_string()),
                ];
                if let Some(year) = year {
                    params.push(("year", year.to_string()));
                }

                let page: TmdbPage = self.get("/search/movie", &params).await?;
                let candidates: Vec<MovieCandidate> = page
                    .results
                    .into_iter()
                    .filter_map(|m| m.into_candidate())
                    .collect();

                tracing::debug!(query = %title, ?year, results = candidates.len(), "TMDB search");
                Ok::<_, AppError>(candidates)
            }
        )
    }

    async fn details(&self, id: MovieId) -> AppResult<MovieDetails> {
        cached!(
            self.cache,
            CacheKey::MovieDetails(id),
            DETAILS_CACHE_TTL,
            async move {
                let details: TmdbMovieDetails = self.get(&format!("/movie/{}", id), &[]).await?;
                Ok::<_, AppError>(MovieDetails::from(details))
            }
        )
    }

    async fn keywords(&self, id: MovieId) -> AppResult<Vec<String>> {
        cached!(
            self.cache,
            CacheKey::MovieKeywords(id),
            DETAILS_CACHE_TTL,
            async move {
                let keywords: TmdbKeywords =
                    self.get(&format!("/movie/{}/keywords", id), &[]).await?;
                Ok::<_, AppError>(
                    keywords
                        .keywords
                        .into_iter()
                        .map(|k| k.name)
                        .filter(|k| !k.trim().is_empty())
                        .collect::<Vec<String>>(),
                )
            }
        )
    }

    async fn similar(&self, id: MovieId) -> AppResult<Vec<MovieCandidate>> {
        cached!(
            self.cache,
            CacheKey::Similar(id),
            LIST_CACHE_TTL,
            self.fetch_list(format!("/movie/{}/similar", id))
        )
    }

    async fn related(&self, id: MovieId) -> AppResult<Vec<MovieCandidate>> {
        cached!(
            self.cache,
            CacheKey::Related(id),
            LIST_CACHE_TTL,
            self.fetch_list(format!("/movie/{}/recommendations", id))
        )
    }
}
