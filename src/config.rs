//! Configuration for the retrieval engine.

use std::path::PathBuf;
use std::time::Duration;

/// Token budget for the chunker.
///
/// Defaults mirror the knowledge-base ingestion this crate replaces:
/// 500-token chunks with a 100-token overlap, counted with the `cl100k_base`
/// encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    pub max_tokens: usize,
    /// Tokens carried over from the tail of one chunk into the next.
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            overlap_tokens: 100,
        }
    }
}

impl ChunkingConfig {
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_overlap_tokens(mut self, overlap_tokens: usize) -> Self {
        self.overlap_tokens = overlap_tokens;
        self
    }
}

/// Top-level configuration for [`RagSystem`](crate::system::RagSystem).
#[derive(Clone, Debug)]
pub struct RagConfig {
    /// Embedding dimension shared by the provider, the durable store, and the
    /// in-memory index. Checked against the provider at construction time.
    pub dimension: usize,
    pub chunking: ChunkingConfig,
    /// Deadline applied to every durable-store call.
    pub store_timeout: Duration,
    /// Deadline for a single embedding request; threaded into the HTTP
    /// provider's client by callers that construct one.
    pub embed_timeout: Duration,
    /// When set, [`RagSystem::spawn_periodic_refresh`] uses this cadence for
    /// background index rebuilds.
    ///
    /// [`RagSystem::spawn_periodic_refresh`]: crate::system::RagSystem::spawn_periodic_refresh
    pub refresh_interval: Option<Duration>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            dimension: 1024,
            chunking: ChunkingConfig::default(),
            store_timeout: Duration::from_secs(10),
            embed_timeout: Duration::from_secs(30),
            refresh_interval: None,
        }
    }
}

impl RagConfig {
    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Resolves the on-disk database path: explicit value first, then the
    /// `RAGSTORE_DB_PATH` environment variable (with `.env` support), then
    /// the default file name in the working directory.
    pub fn resolve_db_path(provided: Option<String>) -> PathBuf {
        if let Some(path) = provided {
            return PathBuf::from(path);
        }
        dotenvy::dotenv().ok();
        PathBuf::from(
            std::env::var("RAGSTORE_DB_PATH").unwrap_or_else(|_| "ragstore.db".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_defaults_match_ingestion_budget() {
        let config = ChunkingConfig::default();
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.overlap_tokens, 100);
    }

    #[test]
    fn explicit_db_path_wins_over_default() {
        let path = RagConfig::resolve_db_path(Some("custom.db".into()));
        assert_eq!(path, PathBuf::from("custom.db"));
    }
}
