//! Bootstrap loader for trusted assertions.
//!
//! A seed file is TOML:
//!
//! ```toml
//! [[seed_truths]]
//! subject = "CLAM"
//! predicate = "è"
//! object = "un robot bambino"
//! ```
//!
//! Seeded assertions skip the extraction stage's filter, so they may speak
//! about the agent itself. Predicates are normalized and every assertion is
//! stored at full confidence.

use std::path::Path;

use clam_knowledge::ontology::Ontology;
use clam_memory::triples::{TripleError, TripleStore};
use clam_types::{Assertion, MAX_CONFIDENCE};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Cannot read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid seed file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Triple store error: {0}")]
    Store(#[from] TripleError),
}

/// One `[[seed_truths]]` entry. Missing fields make the entry unusable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SeedTruth {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub predicate: String,
    #[serde(default)]
    pub object: String,
}

#[derive(Deserialize)]
struct SeedFile {
    #[serde(default)]
    seed_truths: Vec<SeedTruth>,
}

pub fn parse_seed(text: &str) -> Result<Vec<SeedTruth>, SeedError> {
    Ok(toml::from_str::<SeedFile>(text)?.seed_truths)
}

/// Add every usable entry of the file at `path` to `store`. A missing file
/// loads nothing. Returns the number of assertions added.
pub async fn load_seed_truths(path: &Path, store: &TripleStore, ontology: &Ontology) -> Result<usize, SeedError> {
    if !path.exists() {
        warn!(path = %path.display(), "seed file not found");
        return Ok(0);
    }
    let text = tokio::fs::read_to_string(path).await?;
    let mut loaded = 0;
    for truth in parse_seed(&text)? {
        let (subject, object) = (truth.subject.trim(), truth.object.trim());
        let predicate = ontology.normalize(&truth.predicate);
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            debug!(?truth, "incomplete seed entry skipped");
            continue;
        }
        let assertion = Assertion::new(subject, predicate, object, MAX_CONFIDENCE);
        store.add(&assertion).await?;
        debug!(triple = %assertion, "seeded");
        loaded += 1;
    }
    info!(path = %path.display(), loaded, "seed truths loaded");
    Ok(loaded)
}

/// Seed `store` only if it holds no assertions yet.
pub async fn seed_if_empty(path: &Path, store: &TripleStore, ontology: &Ontology) -> Result<usize, SeedError> {
    if store.count().await? > 0 {
        return Ok(0);
    }
    load_seed_truths(path, store, ontology).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"
[[seed_truths]]
subject = "CLAM"
predicate = "è"
object = "un robot bambino"

[[seed_truths]]
subject = "CLAM"
predicate = "Età"
object = "6"

[[seed_truths]]
subject = "CLAM"
predicate = "hobby"
"#;

    async fn open_store() -> TripleStore {
        let store = TripleStore::in_memory();
        store.open().await.unwrap();
        store
    }

    #[test]
    fn parse_reads_entries_and_tolerates_gaps() {
        let truths = parse_seed(SEED).unwrap();
        assert_eq!(truths.len(), 3);
        assert_eq!(truths[2].object, "");
        assert!(parse_seed("").unwrap().is_empty());
        assert!(matches!(parse_seed("[[seed_truths]\n"), Err(SeedError::Parse(_))));
    }

    #[tokio::test]
    async fn load_normalizes_and_allows_the_agent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed_truths.toml");
        std::fs::write(&path, SEED).unwrap();
        let store = open_store().await;

        let loaded = load_seed_truths(&path, &store, &Ontology::standard()).await.unwrap();
        assert_eq!(loaded, 2);

        let all = store.by_entity("CLAM").await.unwrap();
        assert!(all.iter().all(|a| a.confidence == MAX_CONFIDENCE));
        assert!(all.iter().any(|a| a.predicate == "ha_eta" && a.object == "6"));
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let store = open_store().await;
        let loaded = load_seed_truths(Path::new("/nonexistent/seed.toml"), &store, &Ontology::standard())
            .await
            .unwrap();
        assert_eq!(loaded, 0);
    }

    #[tokio::test]
    async fn seed_if_empty_skips_populated_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed_truths.toml");
        std::fs::write(&path, SEED).unwrap();
        let store = open_store().await;
        store.add(&Assertion::new("Utente", "ha_nome", "Ada", 5)).await.unwrap();

        assert_eq!(seed_if_empty(&path, &store, &Ontology::standard()).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
