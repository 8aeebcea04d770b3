//! Durable Vector Store.
//!
//! Two named collections live side by side: **semantic** (consolidated facts)
//! and **episodic** (experiences). The store only shapes the read/write
//! contract; nearest-neighbour search and embedding storage are delegated to a
//! [`SimilarityIndex`], and turning text into vectors is delegated to an
//! [`Embedder`].
//!
//! All access to the index goes through one async lock shared by both
//! collections.
//!
//! # Storage layout ([`SqliteIndex`])
//!
//! Each collection is its own table named `vec_<collection>`:
//!
//! | column     | type | description                                  |
//! |------------|------|----------------------------------------------|
//! | id         | TEXT | Primary key (fact id, preserved across tiers) |
//! | document   | TEXT | Fact description                             |
//! | metadata   | TEXT | JSON object                                  |
//! | embedding  | BLOB | Little-endian f32 vector (4 × N bytes)       |
//! | created_at | TEXT | RFC-3339 write time (UTC)                    |
//!
//! Clearing the store drops both tables and recreates them.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use clam_types::{ConsolidatedFact, Metadata, now_rfc3339};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vector store operations.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Invalid collection name '{0}'")]
    InvalidCollection(String),
    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Vector index lock poisoned")]
    Poisoned,
}

// ─────────────────────────────────────────────────────────────────────────────
// External capabilities
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a piece of text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError>;
}

/// A ranked result from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

/// Collection-oriented storage with nearest-neighbour search.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Create `collection` if it does not already exist.
    async fn create_collection(&self, collection: &str) -> Result<(), VectorError>;
    /// Destroy `collection` and everything in it.
    async fn drop_collection(&self, collection: &str) -> Result<(), VectorError>;
    /// Insert `fact`, replacing any row with the same id.
    async fn upsert(&self, collection: &str, fact: &ConsolidatedFact) -> Result<(), VectorError>;
    /// Return up to `k` entries ranked by similarity to `text`.
    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<VectorMatch>, VectorError>;
    /// Return up to `limit` entries, most recently written first.
    async fn recent(&self, collection: &str, limit: usize) -> Result<Vec<ConsolidatedFact>, VectorError>;
    /// Remove one entry. Absent ids are ignored.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), VectorError>;
    /// Number of entries in `collection`.
    async fn count(&self, collection: &str) -> Result<usize, VectorError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorStore
// ─────────────────────────────────────────────────────────────────────────────

/// The durable two-collection store used by extraction and consolidation.
pub struct VectorStore {
    index: Mutex<Box<dyn SimilarityIndex>>,
    semantic: String,
    episodic: String,
}

impl VectorStore {
    /// Wrap `index` and make sure both collections exist.
    pub async fn new(
        index: Box<dyn SimilarityIndex>,
        semantic: impl Into<String>,
        episodic: impl Into<String>,
    ) -> Result<Self, VectorError> {
        let store = Self {
            index: Mutex::new(index),
            semantic: semantic.into(),
            episodic: episodic.into(),
        };
        {
            let index = store.index.lock().await;
            index.create_collection(&store.semantic).await?;
            index.create_collection(&store.episodic).await?;
        }
        Ok(store)
    }

    pub async fn add_semantic(&self, fact: &ConsolidatedFact) -> Result<(), VectorError> {
        let index = self.index.lock().await;
        index.upsert(&self.semantic, fact).await?;
        debug!(id = %fact.id, "semantic fact written");
        Ok(())
    }

    pub async fn add_episodic(&self, fact: &ConsolidatedFact) -> Result<(), VectorError> {
        let index = self.index.lock().await;
        index.upsert(&self.episodic, fact).await?;
        debug!(id = %fact.id, "episodic entry written");
        Ok(())
    }

    pub async fn search_semantic(&self, query: &str, k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        let index = self.index.lock().await;
        index.query(&self.semantic, query, k).await
    }

    pub async fn search_episodic(&self, query: &str, k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        let index = self.index.lock().await;
        index.query(&self.episodic, query, k).await
    }

    /// Most recently written semantic facts, newest first.
    pub async fn recent_semantic(&self, limit: usize) -> Result<Vec<ConsolidatedFact>, VectorError> {
        let index = self.index.lock().await;
        index.recent(&self.semantic, limit).await
    }

    pub async fn delete_semantic(&self, id: &str) -> Result<(), VectorError> {
        let index = self.index.lock().await;
        index.delete(&self.semantic, id).await
    }

    pub async fn semantic_count(&self) -> Result<usize, VectorError> {
        let index = self.index.lock().await;
        index.count(&self.semantic).await
    }

    /// Destroy and recreate both collections.
    pub async fn clear(&self) -> Result<(), VectorError> {
        let index = self.index.lock().await;
        for name in [&self.semantic, &self.episodic] {
            index.drop_collection(name).await?;
            index.create_collection(name).await?;
        }
        info!(semantic = %self.semantic, episodic = %self.episodic, "vector collections reset");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two equal-length vectors.
///
/// Returns `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn table_name(collection: &str) -> Result<String, VectorError> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("vec_{collection}"))
    } else {
        Err(VectorError::InvalidCollection(collection.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteIndex
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed [`SimilarityIndex`] that ranks by cosine similarity over
/// embeddings produced by an [`Embedder`].
pub struct SqliteIndex {
    conn: StdMutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl SqliteIndex {
    /// Open (or create) a persistent database at `path`.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self, VectorError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: StdMutex::new(conn),
            embedder,
        })
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, VectorError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: StdMutex::new(conn),
            embedder,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, VectorError> {
        self.conn.lock().map_err(|_| VectorError::Poisoned)
    }

    fn rows(
        &self,
        table: &str,
        order_and_limit: &str,
    ) -> Result<Vec<(ConsolidatedFact, Vec<f32>)>, VectorError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, document, metadata, embedding FROM {table} {order_and_limit}"
        ))?;
        let raw = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let document: String = row.get(1)?;
                let metadata: String = row.get(2)?;
                let blob: Vec<u8> = row.get(3)?;
                Ok((id, document, metadata, blob))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(raw.len());
        for (id, document, metadata, blob) in raw {
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            out.push((
                ConsolidatedFact::new(id, document, metadata),
                bytes_to_embedding(&blob),
            ));
        }
        Ok(out)
    }
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    async fn create_collection(&self, collection: &str) -> Result<(), VectorError> {
        let table = table_name(collection)?;
        self.conn()?.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id         TEXT NOT NULL PRIMARY KEY,
                document   TEXT NOT NULL,
                metadata   TEXT NOT NULL,
                embedding  BLOB NOT NULL,
                created_at TEXT NOT NULL
            );"
        ))?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), VectorError> {
        let table = table_name(collection)?;
        self.conn()?
            .execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, fact: &ConsolidatedFact) -> Result<(), VectorError> {
        let table = table_name(collection)?;
        let embedding = self.embedder.embed(&fact.description).await?;
        if embedding.is_empty() {
            return Err(VectorError::Embedding("embedder returned an empty vector".into()));
        }
        let metadata = serde_json::to_string(&fact.metadata)?;
        // REPLACE deletes and reinserts, so a rewritten row also moves to the
        // newest rowid.
        self.conn()?.execute(
            &format!(
                "INSERT OR REPLACE INTO {table} (id, document, metadata, embedding, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                fact.id,
                fact.description,
                metadata,
                embedding_to_bytes(&embedding),
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<VectorMatch>, VectorError> {
        let table = table_name(collection)?;
        let query = self.embedder.embed(text).await?;
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<VectorMatch> = self
            .rows(&table, "")?
            .into_iter()
            .filter(|(_, embedding)| embedding.len() == query.len())
            .map(|(fact, embedding)| VectorMatch {
                score: cosine_similarity(&embedding, &query),
                id: fact.id,
                document: fact.description,
                metadata: fact.metadata,
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn recent(&self, collection: &str, limit: usize) -> Result<Vec<ConsolidatedFact>, VectorError> {
        let table = table_name(collection)?;
        // SQLite limits are signed 64-bit.
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.rows(&table, &format!("ORDER BY rowid DESC LIMIT {limit}"))?;
        Ok(rows.into_iter().map(|(fact, _)| fact).collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), VectorError> {
        let table = table_name(collection)?;
        self.conn()?
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorError> {
        let table = table_name(collection)?;
        let n: i64 = self
            .conn()?
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Letter-frequency vectors: good enough to rank overlapping words.
    struct LetterEmbedder;

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
            let mut v = vec![0.0f32; 26];
            for c in text.to_ascii_lowercase().bytes() {
                if c.is_ascii_lowercase() {
                    v[(c - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    async fn store() -> VectorStore {
        let index = SqliteIndex::open_in_memory(Arc::new(LetterEmbedder)).unwrap();
        VectorStore::new(Box::new(index), "semantic_memory", "episodic_memory")
            .await
            .unwrap()
    }

    fn fact(id: &str, text: &str) -> ConsolidatedFact {
        let mut meta = Metadata::new();
        meta.insert("provenance".into(), "perception".into());
        ConsolidatedFact::new(id, text, meta)
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_returns_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn embedding_bytes_roundtrip() {
        let original = vec![1.5f32, -0.25, 0.0, 42.0];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&original)), original);
    }

    #[test]
    fn collection_names_are_validated() {
        assert_eq!(table_name("semantic_memory").unwrap(), "vec_semantic_memory");
        assert!(matches!(
            table_name("x; DROP TABLE y"),
            Err(VectorError::InvalidCollection(_))
        ));
        assert!(table_name("").is_err());
    }

    #[tokio::test]
    async fn search_ranks_closest_document_first() {
        let store = store().await;
        store.add_semantic(&fact("a", "loves pizza and pasta")).await.unwrap();
        store.add_semantic(&fact("b", "xylophone quartz")).await.unwrap();

        let hits = store.search_semantic("pizza pasta", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].document, "loves pizza and pasta");
        assert_eq!(hits[0].metadata["provenance"], "perception");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn search_respects_k_and_empty_collection() {
        let store = store().await;
        assert!(store.search_semantic("anything", 3).await.unwrap().is_empty());
        for i in 0..5 {
            store.add_semantic(&fact(&format!("f{i}"), "same words")).await.unwrap();
        }
        assert_eq!(store.search_semantic("same", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_and_moves_to_most_recent() {
        let store = store().await;
        store.add_semantic(&fact("a", "first")).await.unwrap();
        store.add_semantic(&fact("b", "second")).await.unwrap();
        store.add_semantic(&fact("a", "first, rewritten")).await.unwrap();

        let recent = store.recent_semantic(50).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "a");
        assert_eq!(recent[0].description, "first, rewritten");
        assert_eq!(store.semantic_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn recent_clamps_huge_limit() {
        let store = store().await;
        store.add_semantic(&fact("a", "one")).await.unwrap();
        store.add_semantic(&fact("b", "two")).await.unwrap();
        assert_eq!(store.recent_semantic(usize::MAX).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn recent_honours_limit() {
        let store = store().await;
        for i in 0..4 {
            store.add_semantic(&fact(&format!("f{i}"), "note")).await.unwrap();
        }
        let recent = store.recent_semantic(2).await.unwrap();
        assert_eq!(
            recent.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
            vec!["f3", "f2"]
        );
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let store = store().await;
        store.add_episodic(&fact("e1", "went to the beach")).await.unwrap();
        assert!(store.recent_semantic(10).await.unwrap().is_empty());
        let hits = store.search_episodic("beach", 1).await.unwrap();
        assert_eq!(hits[0].id, "e1");
    }

    #[tokio::test]
    async fn delete_semantic_removes_one_entry() {
        let store = store().await;
        store.add_semantic(&fact("a", "keep")).await.unwrap();
        store.add_semantic(&fact("b", "drop")).await.unwrap();
        store.delete_semantic("b").await.unwrap();
        store.delete_semantic("missing").await.unwrap();

        let recent = store.recent_semantic(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "a");
    }

    #[tokio::test]
    async fn clear_recreates_both_collections_empty() {
        let store = store().await;
        store.add_semantic(&fact("a", "fact")).await.unwrap();
        store.add_episodic(&fact("e", "episode")).await.unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.semantic_count().await.unwrap(), 0);
        assert!(store.search_episodic("episode", 5).await.unwrap().is_empty());

        // Collections are usable again right away.
        store.add_semantic(&fact("c", "after reset")).await.unwrap();
        assert_eq!(store.semantic_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn persistent_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let path = path.to_string_lossy().to_string();
        {
            let index = SqliteIndex::open(&path, Arc::new(LetterEmbedder)).unwrap();
            let store = VectorStore::new(Box::new(index), "semantic_memory", "episodic_memory")
                .await
                .unwrap();
            store.add_semantic(&fact("kept", "durable fact")).await.unwrap();
        }
        let index = SqliteIndex::open(&path, Arc::new(LetterEmbedder)).unwrap();
        let store = VectorStore::new(Box::new(index), "semantic_memory", "episodic_memory")
            .await
            .unwrap();
        let recent = store.recent_semantic(10).await.unwrap();
        assert_eq!(recent[0].id, "kept");
    }
}
