//! Shared data model for the CLAM memory pipeline.
//!
//! Every crate in the workspace speaks in terms of these types: the volatile
//! [`CandidateFact`], the durable vector-indexed [`ConsolidatedFact`], and the
//! structured [`Assertion`] triple.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Subject used for facts about the human user.
pub const USER_ENTITY: &str = "Utente";

/// Default name of the agent; also the subject of facts about the agent.
pub const AGENT_ENTITY: &str = "CLAM";

/// Confidence given to assertions written by extraction or the seed loader.
pub const MAX_CONFIDENCE: u8 = 5;

/// Current UTC time as an RFC-3339 string, the timestamp format used by every
/// store.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Open key/value metadata attached to a [`ConsolidatedFact`].
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// CandidateFact
// ─────────────────────────────────────────────────────────────────────────────

/// A freshly perceived fact waiting in the volatile buffer.
///
/// Timestamps are kept as RFC-3339 strings exactly as they are stored; the
/// consolidation cycle parses them leniently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFact {
    pub id: String,
    pub description: String,
    /// Starts at 1, moved by the critic and read by consolidation.
    pub confidence_score: i64,
    pub created_at: String,
    pub last_touched: String,
    /// How the fact was derived (e.g. `"perception"`).
    pub provenance: String,
}

impl CandidateFact {
    /// Create a new candidate with a fresh UUID, score 1 and both timestamps
    /// set to now.
    pub fn new(description: impl Into<String>, provenance: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            confidence_score: 1,
            created_at: now.clone(),
            last_touched: now,
            provenance: provenance.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConsolidatedFact
// ─────────────────────────────────────────────────────────────────────────────

/// A fact stored in the durable vector store.
///
/// The id is reused from the [`CandidateFact`] that produced it so lineage is
/// preserved across tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedFact {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ConsolidatedFact {
    pub fn new(id: impl Into<String>, description: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            metadata,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assertion
// ─────────────────────────────────────────────────────────────────────────────

/// A subject–predicate–object statement held by the triple store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Strength of the statement, `1..=5`.
    pub confidence: u8,
    pub timestamp: String,
}

impl Assertion {
    /// Build an assertion with a fresh UUID and the current timestamp.
    ///
    /// `confidence` is clamped to `1..=5`.
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: confidence.clamp(1, MAX_CONFIDENCE),
            timestamp: now_rfc3339(),
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} -> {}", self.subject, self.predicate, self.object)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store routing
// ─────────────────────────────────────────────────────────────────────────────

/// The three stores a single item can be deleted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// The volatile buffer (`stm`).
    Scratch,
    /// The semantic vector collection (`ltm`).
    Vector,
    /// The triple store (`graph`).
    Graph,
}

impl FromStr for StoreKind {
    type Err = ClamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stm" | "scratch" | "buffer" => Ok(StoreKind::Scratch),
            "ltm" | "vector" | "semantic" => Ok(StoreKind::Vector),
            "graph" | "triples" => Ok(StoreKind::Graph),
            other => Err(ClamError::UnknownStore(other.to_string())),
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Scratch => write!(f, "stm"),
            StoreKind::Vector => write!(f, "ltm"),
            StoreKind::Graph => write!(f, "graph"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Lightweight counts gathered from every store on each coordinator tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub taken_at: Option<DateTime<Utc>>,
    pub scratch_count: usize,
    pub semantic_count: usize,
    pub triple_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that cross crate boundaries at the system surface.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClamError {
    #[error("Unknown store '{0}' (expected stm, ltm or graph)")]
    UnknownStore(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("LLM error: {0}")]
    LlmInferenceFailed(String),

    #[error("Seed error: {0}")]
    Seed(String),
}
