//! Crate-wide error taxonomy.
//!
//! Each layer owns its error type ([`ChunkingError`], [`EmbeddingError`],
//! [`StoreError`]); [`RagError`] is the aggregate surfaced by the
//! [`RagSystem`](crate::system::RagSystem) coordinator.

use thiserror::Error;

pub use crate::chunker::ChunkingError;
pub use crate::embedding::EmbeddingError;
pub use crate::stores::StoreError;

/// Top-level error for coordinator operations.
///
/// Per-chunk embedding failures never surface here: the coordinator absorbs
/// them and reports skip counts in the ingest outcome instead. Store failures
/// during ingestion surface as [`RagError::IngestionFailed`] with the document
/// that was being processed; store failures during a query never surface at
/// all (retrieval degrades to the in-memory fallback, then to no results).
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The durable upsert for a document failed; the store and index were
    /// left as they were before the call.
    #[error("ingestion failed for source '{source_key}': {source}")]
    IngestionFailed {
        source_key: String,
        #[source]
        source: StoreError,
    },

    /// Startup-time configuration mismatch (e.g. the embedding provider's
    /// declared dimension disagrees with the system dimension).
    #[error("configuration error: {0}")]
    Config(String),
}
