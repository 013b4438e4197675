//! HTTP embedding client for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{EmbeddingError, EmbeddingProvider};

/// Async embedding client that talks to an OpenAI-compatible endpoint.
///
/// One input per request, per-request timeout baked into the HTTP client,
/// no internal retries.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbeddingProvider {
    /// Builds a client for `{base_url}/embeddings`.
    ///
    /// `api_key` is optional for local providers that skip authentication.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
        api_key: Option<&str>,
    ) -> Result<Self, EmbeddingError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let auth = format!("Bearer {}", key.trim());
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth)
                    .map_err(|_| EmbeddingError::Unavailable("invalid API key header".into()))?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| EmbeddingError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: [input],
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| EmbeddingError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Unavailable(format!(
                "provider returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Unavailable(format!("malformed response: {err}")))?;
        let entry = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Unavailable("response contained no embeddings".into()))?;

        if entry.embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: entry.embedding.len(),
            });
        }
        Ok(entry.embedding)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
