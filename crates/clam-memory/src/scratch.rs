//! Volatile Scratch Buffer.
//!
//! Holds freshly perceived [`CandidateFact`]s in an in-memory SQLite database
//! until the consolidation cycle promotes or forgets them. Nothing here
//! survives a restart: the buffer is created empty every time the process
//! starts.
//!
//! # Storage layout
//!
//! | column           | type    | description                          |
//! |------------------|---------|--------------------------------------|
//! | id               | TEXT    | UUID v4 primary key                  |
//! | description      | TEXT    | Free-text fact                       |
//! | confidence_score | INTEGER | Critic-adjusted score                |
//! | created_at       | TEXT    | RFC-3339 creation time (UTC)         |
//! | last_touched     | TEXT    | RFC-3339 time of last score change   |
//! | provenance       | TEXT    | How the fact was derived             |
//!
//! Every operation takes the buffer's single async lock, so reads and writes
//! never overlap on the underlying connection.
//!
//! # Example
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use clam_memory::scratch::ScratchBuffer;
//! use clam_types::CandidateFact;
//!
//! let buffer = ScratchBuffer::new().unwrap();
//! let fact = CandidateFact::new("The user plays chess", "perception");
//! buffer.add(&fact).await.unwrap();
//! buffer.adjust_score(&fact.id, 1, "2030-01-01T00:00:00+00:00").await.unwrap();
//!
//! let all = buffer.list_all().await.unwrap();
//! assert_eq!(all[0].confidence_score, 2);
//! # }
//! ```

use clam_types::CandidateFact;
use rusqlite::{Connection, ErrorCode, params};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors that can arise from scratch buffer operations.
#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("A candidate fact with id {0} is already buffered")]
    DuplicateId(String),
}

/// In-memory, lock-guarded store of candidate facts.
pub struct ScratchBuffer {
    conn: Mutex<Connection>,
}

impl ScratchBuffer {
    /// Create an empty buffer backed by a private in-memory database.
    pub fn new() -> Result<Self, ScratchError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS candidate_facts (
                id               TEXT NOT NULL PRIMARY KEY,
                description      TEXT NOT NULL,
                confidence_score INTEGER NOT NULL,
                created_at       TEXT NOT NULL,
                last_touched     TEXT NOT NULL,
                provenance       TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Buffer a new fact.
    ///
    /// Returns [`ScratchError::DuplicateId`] if a fact with the same id is
    /// already present; the existing row is left untouched.
    pub async fn add(&self, fact: &CandidateFact) -> Result<(), ScratchError> {
        let conn = self.conn.lock().await;
        let result = conn.execute(
            "INSERT INTO candidate_facts
                 (id, description, confidence_score, created_at, last_touched, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fact.id,
                fact.description,
                fact.confidence_score,
                fact.created_at,
                fact.last_touched,
                fact.provenance,
            ],
        );
        match result {
            Ok(_) => {
                debug!(id = %fact.id, "candidate fact buffered");
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(ScratchError::DuplicateId(fact.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return every buffered fact, in no particular order.
    pub async fn list_all(&self) -> Result<Vec<CandidateFact>, ScratchError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, description, confidence_score, created_at, last_touched, provenance
             FROM candidate_facts",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CandidateFact {
                id: row.get(0)?,
                description: row.get(1)?,
                confidence_score: row.get(2)?,
                created_at: row.get(3)?,
                last_touched: row.get(4)?,
                provenance: row.get(5)?,
            })
        })?;
        let facts = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    /// Add `delta` to the score of `id` and stamp it with `touched_at`.
    ///
    /// Silently does nothing if `id` is not buffered.
    pub async fn adjust_score(&self, id: &str, delta: i64, touched_at: &str) -> Result<(), ScratchError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE candidate_facts
             SET confidence_score = confidence_score + ?1, last_touched = ?2
             WHERE id = ?3",
            params![delta, touched_at, id],
        )?;
        Ok(())
    }

    /// Remove a single fact. Absent ids are ignored.
    pub async fn delete(&self, id: &str) -> Result<(), ScratchError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM candidate_facts WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Drop every buffered fact.
    pub async fn clear(&self) -> Result<(), ScratchError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM candidate_facts", [])?;
        Ok(())
    }

    /// Number of buffered facts.
    pub async fn len(&self) -> Result<usize, ScratchError> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM candidate_facts", [], |r| r.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(desc: &str) -> CandidateFact {
        CandidateFact::new(desc, "perception")
    }

    #[tokio::test]
    async fn add_and_list_roundtrip() {
        let buffer = ScratchBuffer::new().unwrap();
        let f = fact("likes jazz");
        buffer.add(&f).await.unwrap();

        let all = buffer.list_all().await.unwrap();
        assert_eq!(all, vec![f]);
        assert_eq!(buffer.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let buffer = ScratchBuffer::new().unwrap();
        let f = fact("original");
        buffer.add(&f).await.unwrap();

        let mut clash = fact("impostor");
        clash.id = f.id.clone();
        let err = buffer.add(&clash).await.unwrap_err();
        assert!(matches!(err, ScratchError::DuplicateId(ref id) if *id == f.id));

        let all = buffer.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "original");
    }

    #[tokio::test]
    async fn adjust_score_moves_score_and_touch_time() {
        let buffer = ScratchBuffer::new().unwrap();
        let f = fact("works as a nurse");
        buffer.add(&f).await.unwrap();

        buffer.adjust_score(&f.id, 2, "2031-05-05T10:00:00+00:00").await.unwrap();
        buffer.adjust_score(&f.id, -1, "2031-05-05T11:00:00+00:00").await.unwrap();

        let all = buffer.list_all().await.unwrap();
        assert_eq!(all[0].confidence_score, 2);
        assert_eq!(all[0].last_touched, "2031-05-05T11:00:00+00:00");
        assert_eq!(all[0].created_at, f.created_at);
    }

    #[tokio::test]
    async fn adjust_score_on_missing_id_is_noop() {
        let buffer = ScratchBuffer::new().unwrap();
        buffer.adjust_score("nope", 5, "2031-01-01T00:00:00+00:00").await.unwrap();
        assert!(buffer.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let buffer = ScratchBuffer::new().unwrap();
        let a = fact("a");
        let b = fact("b");
        let c = fact("c");
        for f in [&a, &b, &c] {
            buffer.add(f).await.unwrap();
        }

        buffer.delete(&a.id).await.unwrap();
        buffer.delete("not-there").await.unwrap();
        assert_eq!(buffer.len().await.unwrap(), 2);

        buffer.clear().await.unwrap();
        assert!(buffer.list_all().await.unwrap().is_empty());
    }
}
