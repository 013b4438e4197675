//! Deterministic embedding provider for tests and offline pipelines.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use super::{EmbeddingError, EmbeddingProvider};

/// Hash-based bag-of-words embedder.
///
/// Each lowercased word is hashed into a bucket of the output vector, and the
/// result is L2-normalized. Identical text always yields the identical
/// vector, and texts sharing vocabulary land close in cosine space, which is
/// enough to exercise retrieval ordering without a provider on the network.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub const DEFAULT_DIMENSION: usize = 384;

    pub fn new() -> Self {
        Self {
            dimension: Self::DEFAULT_DIMENSION,
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    fn bucket(&self, word: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        (hasher.finish() % self.dimension as u64) as usize
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = text.trim();
        if input.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for word in input
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(&word.to_lowercase())] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn identical_text_gets_identical_vectors() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("vector search enables fast retrieval").await.unwrap();
        let b = provider.embed("vector search enables fast retrieval").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher_than_disjoint() {
        let provider = MockEmbeddingProvider::new();
        let doc = provider.embed("vector search enables fast retrieval").await.unwrap();
        let near = provider.embed("how does vector search work").await.unwrap();
        let far = provider.embed("simmer the broth with ginger").await.unwrap();
        assert!(cosine(&doc, &near) > cosine(&doc, &far));
    }

    #[tokio::test]
    async fn vectors_are_normalized() {
        let provider = MockEmbeddingProvider::new().with_dimension(64);
        let v = provider.embed("normalize me please").await.unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let provider = MockEmbeddingProvider::new();
        assert!(matches!(
            provider.embed("  \n ").await,
            Err(EmbeddingError::EmptyInput)
        ));
    }
}
