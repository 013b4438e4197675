//! Durable storage for chunk embeddings.
//!
//! [`VectorStore`] abstracts the system of record: one row per chunk, keyed
//! by `(source_key, chunk_index)`, with exact cosine similarity search and
//! equality filters on owner and category. [`sqlite::SqliteVectorStore`] is
//! the shipped backend; the trait keeps a pgvector adapter possible without
//! touching callers.
//!
//! Scores use one convention everywhere: cosine similarity
//! (`1 - cosine distance`), descending. The in-memory index uses the same
//! metric so the two result sets stay comparable.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use sqlite::SqliteVectorStore;

/// Durable-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database is unreachable or a statement failed. Fatal to the
    /// current call, never to the process.
    #[error("vector store unavailable: {0}")]
    Unavailable(String),

    /// A record or query violates the store's shape (wrong embedding
    /// dimension, unserializable metadata). The whole batch is rejected.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// One durable chunk row: the unit of storage and retrieval.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Stable identifier of the origin document; unique together with
    /// `chunk_index` and the natural key for upsert/delete-by-document.
    pub source_key: String,
    /// Actor this knowledge is attributed to; `None` means unscoped/system.
    pub owner_id: Option<i64>,
    /// Coarse classification label used for optional filtering.
    pub category: String,
    /// Order of this chunk within its source, contiguous from 0.
    pub chunk_index: usize,
    /// Chunk content.
    pub text: String,
    /// Fixed-dimension embedding; every record in a store shares one length.
    pub embedding: Vec<f32>,
    /// Additional metadata as JSON.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Creates a record with empty metadata and provisional timestamps; the
    /// store assigns the durable ones.
    pub fn new(
        source_key: impl Into<String>,
        chunk_index: usize,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            owner_id: None,
            category: String::new(),
            chunk_index,
            text: text.into(),
            embedding,
            metadata: serde_json::Value::Object(Default::default()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: Option<i64>) -> Self {
        self.owner_id = owner_id;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One retrieval result: the `(text, score, metadata)` triple handed to the
/// downstream content-generation layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    /// Cosine similarity, higher is better.
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// The durable system of record for chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces records by `(source_key, chunk_index)` in a single
    /// transaction; all-or-nothing. Stale tail chunks of a shrunken source
    /// are removed in the same transaction so chunk indexes stay contiguous.
    /// Returns the number of records written.
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError>;

    /// Removes every record for `source_key`. Idempotent: deleting an
    /// unknown source returns 0, not an error.
    async fn delete_by_source(&self, source_key: &str) -> Result<usize, StoreError>;

    /// Removes every record attributed to `owner_id`, or every record in the
    /// store when `None`.
    async fn delete_by_owner(&self, owner_id: Option<i64>) -> Result<usize, StoreError>;

    /// Top-`k` records by cosine similarity, optionally restricted to a
    /// matching owner and/or category. Empty result, never an error, when
    /// nothing matches.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        owner_id: Option<i64>,
        category: Option<&str>,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// All records for one source, ordered by chunk index.
    async fn records_for_source(&self, source_key: &str) -> Result<Vec<VectorRecord>, StoreError>;

    /// Full scan used to rebuild the in-memory index. Safe to call while
    /// upserts are in flight; the read sees a consistent snapshot.
    async fn all_records(&self) -> Result<Vec<VectorRecord>, StoreError>;

    /// Total number of records in the store.
    async fn count(&self) -> Result<usize, StoreError>;
}
