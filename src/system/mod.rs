//! The retrieval coordinator.
//!
//! [`RagSystem`] wires the chunker, the embedding provider, the durable
//! vector store, and the in-memory index together: ingestion runs
//! chunk → embed → upsert → reindex, and queries embed the query text, ask
//! the durable store first, and fall back to the in-memory snapshot when the
//! store is degraded or has nothing to say.
//!
//! Construct one coordinator at process start and pass it explicitly to
//! callers; there is deliberately no process-wide instance hiding behind a
//! free function.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::chunker::Chunker;
use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::index::InMemoryIndex;
use crate::stores::{SearchHit, StoreError, VectorRecord, VectorStore};
use crate::types::RagError;

/// Optional restrictions applied to the durable search of a query.
///
/// The in-memory fallback ignores these: it is a best-effort path and does
/// not support owner scoping.
#[derive(Clone, Debug, Default)]
pub struct QueryFilter {
    pub owner_id: Option<i64>,
    pub category: Option<String>,
}

impl QueryFilter {
    /// Filter scoped to a single owner.
    pub fn owner(owner_id: i64) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Summary of one `add_document` call.
#[derive(Clone, Debug, Default)]
pub struct IngestOutcome {
    pub source_key: String,
    /// Chunks the splitter produced.
    pub chunks_total: usize,
    /// Chunks that produced an embedding and were written.
    pub chunks_embedded: usize,
    /// Chunks dropped because their embedding failed.
    pub chunks_skipped: usize,
    /// Records written by the durable upsert.
    pub records_upserted: usize,
}

impl IngestOutcome {
    fn new(source_key: &str) -> Self {
        Self {
            source_key: source_key.to_string(),
            ..Self::default()
        }
    }
}

/// Category and display file name derived from a storage-path style source
/// key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceKeyParts {
    /// First path segment, when the key has one.
    pub category: Option<String>,
    /// Final path segment with any `_xxxxxxxx` upload suffix stripped from
    /// the file stem.
    pub original_filename: String,
}

/// Derives display metadata from a source key such as
/// `"IT/test_article_1a2b3c4d.txt"` → category `"IT"`, file
/// `"test_article.txt"`.
pub fn parse_source_key(source_key: &str) -> SourceKeyParts {
    static HASH_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let hash_suffix = HASH_SUFFIX
        .get_or_init(|| Regex::new(r"^(?P<stem>.+)_[0-9a-fA-F]{8}$").expect("valid regex"));

    let (category, file) = match source_key.split_once('/') {
        Some((first, rest)) => (
            Some(first.to_string()),
            rest.rsplit('/').next().unwrap_or(rest),
        ),
        None => (None, source_key),
    };

    let original_filename = match file.rsplit_once('.') {
        Some((stem, ext)) => match hash_suffix.captures(stem) {
            Some(caps) => format!("{}.{ext}", &caps["stem"]),
            None => file.to_string(),
        },
        None => match hash_suffix.captures(file) {
            Some(caps) => caps["stem"].to_string(),
            None => file.to_string(),
        },
    };

    SourceKeyParts {
        category,
        original_filename,
    }
}

/// Coordinator over ingestion, removal, and retrieval.
pub struct RagSystem {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    index: InMemoryIndex,
    config: RagConfig,
}

impl RagSystem {
    /// Builds a coordinator, failing fast when the embedding provider's
    /// declared dimension disagrees with the configured system dimension.
    /// The in-memory index starts empty; use [`RagSystem::start`] to also
    /// warm it from the durable store.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: RagConfig,
    ) -> Result<Self, RagError> {
        if embedder.dimension() != config.dimension {
            return Err(RagError::Config(format!(
                "embedding provider '{}' produces {}-dimension vectors but the system is configured for {}",
                embedder.name(),
                embedder.dimension(),
                config.dimension
            )));
        }
        let chunker = Chunker::new(&config.chunking)?;
        Ok(Self {
            chunker,
            embedder,
            store,
            index: InMemoryIndex::new(),
            config,
        })
    }

    /// Builds a coordinator and warms the in-memory index from the durable
    /// store. A store that is unreachable at startup is logged, not fatal:
    /// the process comes up with an empty snapshot and heals on the next
    /// rebuild.
    pub async fn start(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: RagConfig,
    ) -> Result<Arc<Self>, RagError> {
        let system = Arc::new(Self::new(embedder, store, config)?);
        if let Err(err) = system.refresh_index().await {
            warn!(error = %err, "initial index build failed; starting with an empty snapshot");
        }
        Ok(system)
    }

    /// Ingests one document: chunk, embed, upsert, reindex.
    ///
    /// Per-chunk embedding failures are absorbed (skipped with a warning);
    /// an empty document or a document whose chunks all failed to embed is a
    /// no-op, not an error. A durable-store failure aborts the call with
    /// [`RagError::IngestionFailed`] and leaves both stores as they were.
    pub async fn add_document(
        &self,
        source_key: &str,
        owner_id: Option<i64>,
        category: &str,
        raw_text: &str,
    ) -> Result<IngestOutcome, RagError> {
        let chunks = self.chunker.chunk(raw_text);
        let mut outcome = IngestOutcome::new(source_key);
        outcome.chunks_total = chunks.len();
        if chunks.is_empty() {
            info!(source_key, "document produced no chunks; nothing to ingest");
            return Ok(outcome);
        }

        let parts = parse_source_key(source_key);
        let mut records: Vec<VectorRecord> = Vec::with_capacity(chunks.len());
        for (position, text) in chunks.into_iter().enumerate() {
            match self.embedder.embed(&text).await {
                Ok(embedding) => {
                    // Surviving chunks are numbered densely so indexes stay
                    // contiguous even when some chunks are skipped.
                    let chunk_index = records.len();
                    let metadata = json!({
                        "source_key": source_key,
                        "original_filename": parts.original_filename,
                        "category": category,
                        "owner_id": owner_id,
                        "chunk_index": chunk_index,
                    });
                    records.push(
                        VectorRecord::new(source_key, chunk_index, text, embedding)
                            .with_owner(owner_id)
                            .with_category(category)
                            .with_metadata(metadata),
                    );
                }
                Err(err) => {
                    outcome.chunks_skipped += 1;
                    warn!(source_key, position, error = %err, "embedding failed; chunk skipped");
                }
            }
        }
        outcome.chunks_embedded = records.len();
        if records.is_empty() {
            warn!(source_key, "no chunks produced embeddings; ingestion is a no-op");
            return Ok(outcome);
        }

        outcome.records_upserted = self
            .with_store_timeout(self.store.upsert_batch(records))
            .await
            .map_err(|source| {
                error!(source_key, error = %source, "durable upsert failed; ingestion aborted");
                RagError::IngestionFailed {
                    source_key: source_key.to_string(),
                    source,
                }
            })?;

        if let Err(err) = self.refresh_index().await {
            error!(source_key, error = %err, "index rebuild failed; serving previous snapshot");
        }
        info!(
            source_key,
            upserted = outcome.records_upserted,
            skipped = outcome.chunks_skipped,
            "document ingested"
        );
        Ok(outcome)
    }

    /// Removes every chunk of a document, then rebuilds the index.
    /// Idempotent: removing an unknown source returns 0.
    pub async fn remove_document(&self, source_key: &str) -> Result<usize, RagError> {
        let deleted = self
            .with_store_timeout(self.store.delete_by_source(source_key))
            .await?;
        if let Err(err) = self.refresh_index().await {
            error!(source_key, error = %err, "index rebuild failed; serving previous snapshot");
        }
        info!(source_key, deleted, "document removed");
        Ok(deleted)
    }

    /// Answers a similarity query with up to `k` hits, best first.
    ///
    /// Never errors: a failed query embedding yields no results, and a
    /// degraded or empty durable store falls back to the in-memory snapshot.
    /// The durable store is authoritative and filterable; the fallback is
    /// advisory and served unfiltered.
    pub async fn retrieve(&self, query_text: &str, k: usize, filter: QueryFilter) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let query = match self.embedder.embed(query_text).await {
            Ok(vector) => vector,
            Err(err) => {
                warn!(error = %err, "query embedding failed; returning no results");
                return Vec::new();
            }
        };

        match self
            .with_store_timeout(self.store.search(
                &query,
                k,
                filter.owner_id,
                filter.category.as_deref(),
            ))
            .await
        {
            Ok(hits) if !hits.is_empty() => return hits,
            Ok(_) => {
                debug!("durable store returned no matches; falling back to in-memory index");
            }
            Err(err) => {
                warn!(error = %err, "durable search failed; falling back to in-memory index");
            }
        }

        self.index.search(&query, k)
    }

    /// Rebuilds the in-memory index from a full durable scan. This is the
    /// single rebuild path shared by ingestion, removal, and the periodic
    /// refresh timer. On failure the previous snapshot keeps serving.
    pub async fn refresh_index(&self) -> Result<usize, StoreError> {
        let records = self.with_store_timeout(self.store.all_records()).await?;
        let count = records.len();
        self.index.build(&records);
        debug!(
            records = count,
            version = self.index.version(),
            "in-memory index rebuilt"
        );
        Ok(count)
    }

    /// Spawns the periodic refresh task when `config.refresh_interval` is
    /// set. The caller owns the handle; aborting it stops the timer.
    pub fn spawn_periodic_refresh(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval = self.config.refresh_interval?;
        let system = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so refreshes run
            // one interval apart from startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = system.refresh_index().await {
                    warn!(error = %err, "periodic index refresh failed");
                }
            }
        }))
    }

    /// Read access to the in-memory index, mainly for observability.
    pub fn index(&self) -> &InMemoryIndex {
        &self.index
    }

    async fn with_store_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(timeout_message(
                self.config.store_timeout,
            ))),
        }
    }
}

fn timeout_message(limit: Duration) -> String {
    format!("store call timed out after {limit:?}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_with_upload_suffix_is_cleaned() {
        let parts = parse_source_key("IT/test_article_12345678.txt");
        assert_eq!(parts.category.as_deref(), Some("IT"));
        assert_eq!(parts.original_filename, "test_article.txt");
    }

    #[test]
    fn source_key_without_suffix_is_untouched() {
        let parts = parse_source_key("Fashion/article.txt");
        assert_eq!(parts.category.as_deref(), Some("Fashion"));
        assert_eq!(parts.original_filename, "article.txt");
    }

    #[test]
    fn bare_source_key_has_no_category() {
        let parts = parse_source_key("notes.txt");
        assert_eq!(parts.category, None);
        assert_eq!(parts.original_filename, "notes.txt");
    }

    #[test]
    fn nested_source_key_keeps_first_segment_as_category() {
        let parts = parse_source_key("Beauty/2024/serum_0a1b2c3d.txt");
        assert_eq!(parts.category.as_deref(), Some("Beauty"));
        assert_eq!(parts.original_filename, "serum.txt");
    }

    #[test]
    fn filter_builders_compose() {
        let filter = QueryFilter::owner(5).with_category("IT");
        assert_eq!(filter.owner_id, Some(5));
        assert_eq!(filter.category.as_deref(), Some("IT"));
    }
}
