//! ```text
//! Document pipeline ──► RagSystem::add_document
//!                             │
//!                  Chunker ───┤ (token-budgeted, sentence-aware)
//!                             │
//!        EmbeddingProvider ───┤ (one call per chunk; failures skip)
//!                             │
//!                             ├─► stores::SqliteVectorStore  (system of record,
//!                             │       transactional upsert, cosine search)
//!                             │
//!                             └─► index::InMemoryIndex       (rebuilt snapshot,
//!                                     low-latency fallback)
//!
//! Content generation ──► RagSystem::retrieve ──► durable search ──► fallback
//! ```
//!
//! Retrieval layer for a knowledge base of free-text documents: splits them
//! into overlapping chunks, embeds each chunk, persists the vectors, and
//! answers top-K similarity queries scoped to an owner and/or category. The
//! durable store is authoritative; the in-memory index is a materialized view
//! that keeps queries answering while the store is degraded.

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod index;
pub mod stores;
pub mod system;
pub mod types;

pub use chunker::Chunker;
pub use config::{ChunkingConfig, RagConfig};
pub use embedding::{
    CategoryEmbeddings, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider,
};
pub use index::InMemoryIndex;
pub use stores::{SearchHit, SqliteVectorStore, VectorRecord, VectorStore};
pub use system::{IngestOutcome, QueryFilter, RagSystem, SourceKeyParts, parse_source_key};
pub use types::{ChunkingError, EmbeddingError, RagError, StoreError};
