//! OpenAI-compatible `/embeddings` client.
use crate::{
    error::{AppError, AppResult},
    services::providers::EmbeddingProvider,
};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sent in place of blank inputs, which the API rejects
const EMPTY_INPUT_PLACEHOLDER: &str = " ";

#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    http_client: HttpClient,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    dimensions: i32,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Trims every text and substitutes the placeholder for blank ones
pub fn prepare_inputs(texts: &[String]) -> Vec<String> {
    texts
        .iter()
        .map(|t| {
            let trimmed = t.trim();
            if trimmed.is_empty() {
                EMPTY_INPUT_PLACEHOLDER.to_string()
            } else {
                trimmed.to_string()
            }
        })
        .collect()
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Restores input order and checks every input got exactly one vector
fn into_ordered(mut data: Vec<EmbeddingDatum>, expected: usize) -> AppResult<Vec<Vec<f32>>> {
    data.sort_by_key(|d| d.index);
    let in_order = data.iter().enumerate().all(|(i, d)| d.index == i);
    if data.len() != expected || !in_order {
        return Err(AppError::ExternalApi(format!(
            "Embedding response has {} vectors for {} inputs",
            data.len(),
            expected
        )));
    }
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(
        &self,
        texts: &[String],
        model: &str,
        dimensions: i32,
    ) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model,
            input: prepare_inputs(texts),
            dimensions,
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Embeddings API returned status {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let vectors = into_ordered(parsed.data, texts.len())?;

        tracing::debug!(
            model,
            dimensions,
            inputs = texts.len(),
            "Embedded batch"
        );
        Ok(vectors)
    }
}
