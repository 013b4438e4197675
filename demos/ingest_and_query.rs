//! Walkthrough of the full retrieval loop: ingest a few documents, query
//! them with and without owner scoping, then remove one and query again.
//!
//! Runs entirely offline against the deterministic mock embedder and a
//! SQLite file (override the location with `RAGSTORE_DB_PATH`):
//!
//! ```bash
//! cargo run --example ingest_and_query
//! ```

use std::sync::Arc;

use ragstore::{
    MockEmbeddingProvider, QueryFilter, RagConfig, RagError, RagSystem, SqliteVectorStore,
};

const DIMENSION: usize = 384;

#[tokio::main]
async fn main() -> Result<(), RagError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let db_path = RagConfig::resolve_db_path(None);
    println!("using database at {}", db_path.display());

    let store = SqliteVectorStore::open(&db_path, DIMENSION).await?;
    let embedder = Arc::new(MockEmbeddingProvider::new().with_dimension(DIMENSION));
    let config = RagConfig::default().with_dimension(DIMENSION);
    let system = RagSystem::start(embedder, Arc::new(store), config).await?;

    let outcome = system
        .add_document(
            "IT/vector_search_basics.txt",
            Some(1),
            "IT",
            "Vector search enables fast retrieval over large document sets. \
             Each chunk of text is embedded into a fixed-length vector, and \
             queries are answered by comparing embeddings with cosine distance.",
        )
        .await?;
    println!(
        "ingested '{}': {} chunks written, {} skipped",
        outcome.source_key, outcome.records_upserted, outcome.chunks_skipped
    );

    system
        .add_document(
            "Food/weeknight_broth.txt",
            Some(2),
            "Food",
            "Simmer the broth gently with ginger and scallions. Season late, \
             taste often, and serve over noodles with plenty of herbs.",
        )
        .await?;

    let hits = system
        .retrieve("how does vector search work", 3, QueryFilter::owner(1))
        .await;
    println!("\nowner-scoped query returned {} hit(s):", hits.len());
    for hit in &hits {
        println!("  score {:.3}: {}", hit.score, preview(&hit.text));
    }

    let hits = system
        .retrieve("a comforting soup recipe", 3, QueryFilter::default())
        .await;
    println!("\nunscoped query returned {} hit(s):", hits.len());
    for hit in &hits {
        println!("  score {:.3}: {}", hit.score, preview(&hit.text));
    }

    let deleted = system.remove_document("Food/weeknight_broth.txt").await?;
    println!("\nremoved the broth document ({deleted} record(s))");

    let hits = system
        .retrieve("a comforting soup recipe", 3, QueryFilter::default())
        .await;
    println!("same query now returns {} hit(s)", hits.len());

    Ok(())
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.len() > 72 {
        let cut = flat
            .char_indices()
            .take_while(|(i, _)| *i < 72)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(flat.len());
        format!("{}…", &flat[..cut])
    } else {
        flat
    }
}
