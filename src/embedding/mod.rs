//! Embedding clients: the provider trait, the HTTP-backed implementation,
//! and a deterministic mock for tests and offline runs.
//!
//! Providers make exactly one outbound call per `embed` invocation and never
//! retry internally; retry policy belongs to callers, and the coordinator
//! treats every embedding failure as "skip this chunk", never as fatal to a
//! whole ingestion batch.

pub mod http;
pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, warn};

pub use http::HttpEmbeddingProvider;
pub use mock::MockEmbeddingProvider;

/// Embedding failures. All variants are recoverable: callers drop the
/// affected chunk or query and move on.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Network failure, provider-side error, or a malformed response body.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// The input was empty after normalization; nothing to embed.
    #[error("input text is empty after normalization")]
    EmptyInput,

    /// The provider returned a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A client for an external embedding provider.
///
/// `dimension` is the provider's declared output length; the coordinator
/// checks it against the system dimension once at startup, so a disagreement
/// is a configuration error rather than a per-call surprise.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short human-readable provider name, used in logs.
    fn name(&self) -> &str;

    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Embeds one text into a fixed-length vector. One outbound call, no
    /// internal retries.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Precomputed embeddings for a fixed set of category labels.
///
/// Downstream consumers compare content against a known label set often
/// enough that re-embedding the labels per request is wasteful; this cache
/// embeds each label once and serves lookups synchronously afterwards.
pub struct CategoryEmbeddings {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
}

impl CategoryEmbeddings {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Embeds every label and caches the result. Labels that fail to embed
    /// are logged and skipped; they simply stay absent from the cache.
    pub async fn precompute<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for label in labels {
            let label = label.into();
            if self.cache.read().contains_key(&label) {
                continue;
            }
            match self.provider.embed(&label).await {
                Ok(embedding) => {
                    self.cache.write().insert(label, embedding);
                }
                Err(err) => {
                    warn!(label = %label, error = %err, "failed to embed category label");
                }
            }
        }
        info!(cached = self.len(), "category embeddings precomputed");
    }

    /// Cached embedding for `label`, if precomputation succeeded for it.
    pub fn get(&self, label: &str) -> Option<Vec<f32>> {
        self.cache.read().get(label).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn category_cache_serves_precomputed_labels() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(MockEmbeddingProvider::new());
        let cache = CategoryEmbeddings::new(Arc::clone(&provider));

        cache.precompute(["IT", "Fashion"]).await;

        assert_eq!(cache.len(), 2);
        let direct = provider.embed("IT").await.unwrap();
        assert_eq!(cache.get("IT"), Some(direct));
        assert!(cache.get("Beauty").is_none());
    }
}
