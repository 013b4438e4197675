//! SQLite-backed durable vector store.
//!
//! Embeddings live as JSON float arrays next to their chunk rows and are
//! compared with `vec_distance_cosine` from the `sqlite-vec` extension, so
//! search is an exact scan rather than an approximation. The extension is
//! registered process-wide through SQLite's auto-extension hook before the
//! first connection opens.

use std::collections::HashMap;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, ffi, rusqlite};
use tracing::debug;

use super::{SearchHit, StoreError, VectorRecord, VectorStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS knowledge_vectors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_key TEXT NOT NULL,
    owner_id INTEGER,
    category TEXT NOT NULL DEFAULT '',
    chunk_index INTEGER NOT NULL,
    text_content TEXT NOT NULL,
    embedding TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    UNIQUE (source_key, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_knowledge_vectors_owner
    ON knowledge_vectors (owner_id);
CREATE INDEX IF NOT EXISTS idx_knowledge_vectors_category
    ON knowledge_vectors (category);
";

const RECORD_COLUMNS: &str = "source_key, owner_id, category, chunk_index, \
     text_content, embedding, metadata, created_at, updated_at";

/// Durable vector store over a single SQLite database file.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteVectorStore {
    /// Opens (and migrates) the store at `path`.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::initialize(conn, dimension).await
    }

    /// Opens a store backed by a private in-memory database, used by tests
    /// and demos.
    pub async fn open_in_memory(dimension: usize) -> Result<Self, StoreError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Self::initialize(conn, dimension).await
    }

    async fn initialize(conn: Connection, dimension: usize) -> Result<Self, StoreError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            // Confirm the vec extension actually loaded before trusting it.
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
                ?;
            conn.execute_batch(SCHEMA)
                ?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self { conn, dimension })
    }

    /// Embedding dimension this store was opened with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn register_sqlite_vec() -> Result<(), StoreError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(StoreError::Unavailable)
    }

    fn encode_query(&self, query: &[f32]) -> Result<String, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::InvalidRecord(format!(
                "query has dimension {}, store expects {}",
                query.len(),
                self.dimension
            )));
        }
        serde_json::to_string(query).map_err(|err| StoreError::InvalidRecord(err.to_string()))
    }
}

/// Row tuple prepared for insertion, with embedding and metadata already
/// serialized to JSON.
struct PreparedRow {
    source_key: String,
    owner_id: Option<i64>,
    category: String,
    chunk_index: i64,
    text: String,
    embedding_json: String,
    metadata_json: String,
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert_batch(&self, records: Vec<VectorRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Per-source high-water marks, so chunks past the new tail of a
        // shrunken source are removed in the same transaction.
        let mut next_index: HashMap<String, i64> = HashMap::new();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(StoreError::InvalidRecord(format!(
                    "record '{}' chunk {} has dimension {}, store expects {}",
                    record.source_key,
                    record.chunk_index,
                    record.embedding.len(),
                    self.dimension
                )));
            }
            let embedding_json = serde_json::to_string(&record.embedding)
                .map_err(|err| StoreError::InvalidRecord(err.to_string()))?;
            let chunk_index = record.chunk_index as i64;
            let watermark = next_index.entry(record.source_key.clone()).or_insert(0);
            *watermark = (*watermark).max(chunk_index + 1);
            rows.push(PreparedRow {
                source_key: record.source_key,
                owner_id: record.owner_id,
                category: record.category,
                chunk_index,
                text: record.text,
                embedding_json,
                metadata_json: record.metadata.to_string(),
            });
        }

        let written = self
            .conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn
                    .transaction()
                    ?;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT INTO knowledge_vectors
                                 (source_key, owner_id, category, chunk_index,
                                  text_content, embedding, metadata)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                             ON CONFLICT (source_key, chunk_index) DO UPDATE SET
                                 owner_id = excluded.owner_id,
                                 category = excluded.category,
                                 text_content = excluded.text_content,
                                 embedding = excluded.embedding,
                                 metadata = excluded.metadata,
                                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')",
                        )
                        ?;
                    for row in &rows {
                        stmt.execute((
                            &row.source_key,
                            row.owner_id,
                            &row.category,
                            row.chunk_index,
                            &row.text,
                            &row.embedding_json,
                            &row.metadata_json,
                        ))
                        ?;
                    }
                    let mut trim = tx
                        .prepare(
                            "DELETE FROM knowledge_vectors
                             WHERE source_key = ?1 AND chunk_index >= ?2",
                        )
                        ?;
                    for (source_key, watermark) in &next_index {
                        trim.execute((source_key, watermark))
                            ?;
                    }
                }
                tx.commit()?;
                Ok(rows.len())
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        debug!(written, "upserted vector records");
        Ok(written)
    }

    async fn delete_by_source(&self, source_key: &str) -> Result<usize, StoreError> {
        let source_key = source_key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM knowledge_vectors WHERE source_key = ?1",
                    [&source_key],
                )
                
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn delete_by_owner(&self, owner_id: Option<i64>) -> Result<usize, StoreError> {
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let deleted = match owner_id {
                    Some(owner) => conn
                        .execute(
                            "DELETE FROM knowledge_vectors WHERE owner_id = ?1",
                            [owner],
                        )
                        ?,
                    None => conn
                        .execute("DELETE FROM knowledge_vectors", [])
                        ?,
                };
                Ok(deleted)
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        owner_id: Option<i64>,
        category: Option<&str>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_json = self.encode_query(query)?;
        let category = category.map(str::to_string);

        self.conn
            .call(move |conn| -> Result<Vec<SearchHit>, rusqlite::Error> {
                let mut stmt = conn
                    .prepare(
                        "SELECT text_content, metadata,
                                vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance
                         FROM knowledge_vectors
                         WHERE (?2 IS NULL OR owner_id = ?2)
                           AND (?3 IS NULL OR category = ?3)
                         ORDER BY distance ASC
                         LIMIT ?4",
                    )
                    ?;

                let rows = stmt
                    .query_map((&query_json, owner_id, &category, k as i64), |row| {
                        let distance: f64 = row.get(2)?;
                        Ok(SearchHit {
                            text: row.get(0)?,
                            score: 1.0 - distance as f32,
                            metadata: serde_json::from_str(&row.get::<_, String>(1)?)
                                .unwrap_or_default(),
                        })
                    })
                    ?;

                let mut hits = Vec::new();
                for row in rows {
                    hits.push(row?);
                }
                Ok(hits)
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn records_for_source(&self, source_key: &str) -> Result<Vec<VectorRecord>, StoreError> {
        let source_key = source_key.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<VectorRecord>, rusqlite::Error> {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {RECORD_COLUMNS} FROM knowledge_vectors
                         WHERE source_key = ?1
                         ORDER BY chunk_index ASC"
                    ))
                    ?;
                let rows = stmt
                    .query_map([&source_key], |row| {
                        Ok(VectorRecord {
                            source_key: row.get(0)?,
                            owner_id: row.get(1)?,
                            category: row.get(2)?,
                            chunk_index: row.get::<_, i64>(3)?.max(0) as usize,
                            text: row.get(4)?,
                            embedding: serde_json::from_str(&row.get::<_, String>(5)?)
                                .unwrap_or_default(),
                            metadata: serde_json::from_str(&row.get::<_, String>(6)?)
                                .unwrap_or_default(),
                            created_at: parse_timestamp(&row.get::<_, String>(7)?),
                            updated_at: parse_timestamp(&row.get::<_, String>(8)?),
                        })
                    })
                    ?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn all_records(&self) -> Result<Vec<VectorRecord>, StoreError> {
        self.conn
            .call(move |conn| -> Result<Vec<VectorRecord>, rusqlite::Error> {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {RECORD_COLUMNS} FROM knowledge_vectors
                         ORDER BY source_key ASC, chunk_index ASC"
                    ))
                    ?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(VectorRecord {
                            source_key: row.get(0)?,
                            owner_id: row.get(1)?,
                            category: row.get(2)?,
                            chunk_index: row.get::<_, i64>(3)?.max(0) as usize,
                            text: row.get(4)?,
                            embedding: serde_json::from_str(&row.get::<_, String>(5)?)
                                .unwrap_or_default(),
                            metadata: serde_json::from_str(&row.get::<_, String>(6)?)
                                .unwrap_or_default(),
                            created_at: parse_timestamp(&row.get::<_, String>(7)?),
                            updated_at: parse_timestamp(&row.get::<_, String>(8)?),
                        })
                    })
                    ?;
                let mut records = Vec::new();
                for row in rows {
                    records.push(row?);
                }
                Ok(records)
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| -> Result<usize, rusqlite::Error> {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM knowledge_vectors", [], |row| {
                        row.get(0)
                    })
                    ?;
                Ok(count.max(0) as usize)
            })
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(
        source_key: &str,
        chunk_index: usize,
        text: &str,
        embedding: Vec<f32>,
    ) -> VectorRecord {
        VectorRecord::new(source_key, chunk_index, text, embedding)
            .with_owner(Some(1))
            .with_category("IT")
            .with_metadata(json!({"source_key": source_key, "chunk_index": chunk_index}))
    }

    #[tokio::test]
    async fn upsert_then_search_returns_nearest_first() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        store
            .upsert_batch(vec![
                record("docs/a.txt", 0, "close", vec![1.0, 0.0, 0.0]),
                record("docs/a.txt", 1, "far", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0, 0.0], 2, None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "close");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn reupsert_replaces_instead_of_appending() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        let batch = vec![
            record("docs/a.txt", 0, "first", vec![1.0, 0.0, 0.0]),
            record("docs/a.txt", 1, "second", vec![0.0, 1.0, 0.0]),
        ];
        store.upsert_batch(batch.clone()).await.unwrap();
        store.upsert_batch(batch).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn shrinking_a_source_trims_stale_tail_chunks() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        store
            .upsert_batch(vec![
                record("docs/a.txt", 0, "zero", vec![1.0, 0.0, 0.0]),
                record("docs/a.txt", 1, "one", vec![0.0, 1.0, 0.0]),
                record("docs/a.txt", 2, "two", vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();

        store
            .upsert_batch(vec![record("docs/a.txt", 0, "only", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let records = store.records_for_source("docs/a.txt").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "only");
        assert_eq!(records[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn owner_and_category_filters_restrict_results() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        store
            .upsert_batch(vec![
                record("docs/a.txt", 0, "mine", vec![1.0, 0.0, 0.0]),
                VectorRecord::new("docs/b.txt", 0, "theirs", vec![1.0, 0.0, 0.0])
                    .with_owner(Some(2))
                    .with_category("Fashion"),
            ])
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0, 0.0], 5, Some(1), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "mine");

        let hits = store
            .search(&[1.0, 0.0, 0.0], 5, None, Some("Fashion"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "theirs");

        let hits = store
            .search(&[1.0, 0.0, 0.0], 5, Some(7), None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_by_source_is_idempotent() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        store
            .upsert_batch(vec![record("docs/a.txt", 0, "text", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(store.delete_by_source("docs/a.txt").await.unwrap(), 1);
        assert_eq!(store.delete_by_source("docs/a.txt").await.unwrap(), 0);
        assert_eq!(store.delete_by_source("docs/missing.txt").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_by_owner_scopes_to_one_owner_or_everything() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        store
            .upsert_batch(vec![
                record("docs/a.txt", 0, "mine", vec![1.0, 0.0, 0.0]),
                VectorRecord::new("docs/b.txt", 0, "theirs", vec![0.0, 1.0, 0.0])
                    .with_owner(Some(2)),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_owner(Some(1)).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.delete_by_owner(None).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_dimension_rejects_the_whole_batch() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        let result = store
            .upsert_batch(vec![
                record("docs/a.txt", 0, "fine", vec![1.0, 0.0, 0.0]),
                record("docs/a.txt", 1, "bad", vec![1.0, 0.0]),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::InvalidRecord(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reopening_a_file_backed_store_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.db");
        {
            let store = SqliteVectorStore::open(&path, 3).await.unwrap();
            store
                .upsert_batch(vec![record("docs/a.txt", 0, "persisted", vec![1.0, 0.0, 0.0])])
                .await
                .unwrap();
        }

        let store = SqliteVectorStore::open(&path, 3).await.unwrap();
        let records = store.records_for_source("docs/a.txt").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "persisted");
        assert!(records[0].created_at > DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn search_on_empty_store_returns_nothing() {
        let store = SqliteVectorStore::open_in_memory(3).await.unwrap();
        let hits = store.search(&[1.0, 0.0, 0.0], 3, None, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
