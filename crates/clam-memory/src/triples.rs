//! Durable Triple Store.
//!
//! Persists [`Assertion`]s in a single SQLite table keyed by assertion id,
//! with secondary indexes on subject and object so entity lookups and pattern
//! deletes stay cheap as the graph grows.
//!
//! The store is created closed. [`TripleStore::open`] must be awaited before
//! any other operation; calling one earlier yields [`TripleError::NotOpen`].
//!
//! # Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use clam_memory::triples::TripleStore;
//! use clam_types::Assertion;
//!
//! let store = TripleStore::in_memory();
//! store.open().await.unwrap();
//! store.add(&Assertion::new("Utente", "vive_a", "Torino", 5)).await.unwrap();
//!
//! let about_user = store.by_entity("Utente").await.unwrap();
//! assert_eq!(about_user[0].object, "Torino");
//! # }
//! ```

use std::path::PathBuf;

use clam_types::Assertion;
use rusqlite::{Connection, Row, params};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors that can arise from triple store operations.
#[derive(Error, Debug)]
pub enum TripleError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Triple store used before open()")]
    NotOpen,
}

const SELECT_COLUMNS: &str = "SELECT id, subject, predicate, object, confidence, timestamp FROM triples";

/// Lock-guarded, persistent assertion table.
pub struct TripleStore {
    path: Option<PathBuf>,
    conn: Mutex<Option<Connection>>,
}

impl TripleStore {
    /// A store backed by the database file at `path`. Nothing is touched on
    /// disk until [`open`](Self::open).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            conn: Mutex::new(None),
        }
    }

    /// A store backed by a private in-memory database (useful for testing).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            conn: Mutex::new(None),
        }
    }

    /// Open the database and create the schema if needed. Opening an already
    /// open store is a no-op.
    pub async fn open(&self) -> Result<(), TripleError> {
        let mut guard = self.conn.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let conn = match &self.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS triples (
                id         TEXT NOT NULL PRIMARY KEY,
                subject    TEXT NOT NULL,
                predicate  TEXT NOT NULL,
                object     TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                timestamp  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_subject ON triples (subject);
            CREATE INDEX IF NOT EXISTS idx_object ON triples (object);",
        )?;
        info!(path = ?self.path, "triple store opened");
        *guard = Some(conn);
        Ok(())
    }

    /// Close the connection. Subsequent operations fail until reopened.
    pub async fn close(&self) {
        self.conn.lock().await.take();
    }

    /// Insert `assertion`, replacing every field of any row with the same id.
    pub async fn add(&self, assertion: &Assertion) -> Result<(), TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        conn.execute(
            "INSERT OR REPLACE INTO triples (id, subject, predicate, object, confidence, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                assertion.id,
                assertion.subject,
                assertion.predicate,
                assertion.object,
                assertion.confidence,
                assertion.timestamp,
            ],
        )?;
        debug!(id = %assertion.id, triple = %assertion, "assertion stored");
        Ok(())
    }

    /// Every assertion, newest first.
    pub async fn all_triples(&self) -> Result<Vec<Assertion>, TripleError> {
        self.select("ORDER BY timestamp DESC", None).await
    }

    /// Assertions whose subject or object contains `name` (case-sensitive),
    /// highest confidence first.
    pub async fn by_entity(&self, name: &str) -> Result<Vec<Assertion>, TripleError> {
        self.select(
            "WHERE instr(subject, ?1) > 0 OR instr(object, ?1) > 0 ORDER BY confidence DESC",
            Some(name),
        )
        .await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<(), TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        conn.execute("DELETE FROM triples WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Delete every row equal to `(subject, predicate, object)` ignoring case.
    /// Returns the number of rows removed.
    pub async fn delete_by_exact_pattern(
        &self,
        subject: &str,
        predicate: &str,
        object: &str,
    ) -> Result<usize, TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        let removed = conn.execute(
            "DELETE FROM triples
             WHERE subject = ?1 COLLATE NOCASE
               AND predicate = ?2 COLLATE NOCASE
               AND object = ?3 COLLATE NOCASE",
            params![subject, predicate, object],
        )?;
        debug!(subject, predicate, object, removed, "pattern retraction");
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        conn.execute("DELETE FROM triples", [])?;
        info!("triple store cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM triples", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    async fn select(&self, tail: &str, entity: Option<&str>) -> Result<Vec<Assertion>, TripleError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TripleError::NotOpen)?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} {tail}"))?;
        let rows = match entity {
            Some(name) => stmt.query_map(params![name], row_to_assertion)?,
            None => stmt.query_map([], row_to_assertion)?,
        };
        let triples = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(triples)
    }
}

fn row_to_assertion(row: &Row<'_>) -> rusqlite::Result<Assertion> {
    Ok(Assertion {
        id: row.get(0)?,
        subject: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        confidence: row.get(4)?,
        timestamp: row.get(5)?,
    })
}
