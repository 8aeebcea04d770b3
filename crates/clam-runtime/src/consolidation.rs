//! [`ConsolidationCycle`] – promotion and decay of buffered facts.
//!
//! One pass over the scratch buffer:
//!
//! 1. **Promotion** – a fact whose score has reached the promotion threshold
//!    is written to the semantic collection together with the ids of its
//!    nearest existing neighbours, then removed from the buffer.
//! 2. **Decay** – otherwise, a fact untouched for longer than the decay
//!    window whose score is below the minimum is removed.
//!
//! Promotion is checked first and wins. The durable write and the buffer
//! delete are two separate store operations; the durable write is an upsert by
//! id, so a promotion repeated after an interruption rewrites the same row.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use clam_memory::scratch::{ScratchBuffer, ScratchError};
use clam_memory::vector::{VectorError, VectorStore};
use clam_types::{CandidateFact, ConsolidatedFact, Metadata};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How many existing facts are linked to a promoted one.
pub const LINKED_NEIGHBOURS: usize = 2;

#[derive(Error, Debug)]
pub enum ConsolidationError {
    #[error("Scratch buffer error: {0}")]
    Buffer(#[from] ScratchError),
    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),
}

/// Thresholds for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsolidationPolicy {
    /// Score at or above which a fact is promoted.
    pub promotion_threshold: i64,
    /// Minutes without a touch after which a weak fact may decay.
    pub decay_minutes: f64,
    /// Score below which a stale fact decays.
    pub min_score: i64,
}

impl Default for ConsolidationPolicy {
    fn default() -> Self {
        Self {
            promotion_threshold: 3,
            decay_minutes: 60.0,
            min_score: 1,
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub promoted: Vec<String>,
    pub decayed: Vec<String>,
    pub retained: usize,
    /// Facts whose promotion or deletion failed; retried next cycle.
    pub failures: usize,
}

pub struct ConsolidationCycle {
    scratch: Arc<ScratchBuffer>,
    vectors: Arc<VectorStore>,
    policy: ConsolidationPolicy,
}

/// Parse a stored timestamp. Accepts RFC 3339 (with `Z` or an offset) and
/// naive ISO-8601, which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl ConsolidationCycle {
    pub fn new(scratch: Arc<ScratchBuffer>, vectors: Arc<VectorStore>, policy: ConsolidationPolicy) -> Self {
        Self {
            scratch,
            vectors,
            policy,
        }
    }

    pub fn policy(&self) -> ConsolidationPolicy {
        self.policy
    }

    pub async fn cycle(&self) -> Result<CycleReport, ConsolidationError> {
        self.cycle_at(Utc::now()).await
    }

    /// Run one pass as if the current time were `now`.
    pub async fn cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, ConsolidationError> {
        let facts = self.scratch.list_all().await?;
        let mut report = CycleReport::default();

        for fact in facts {
            let last_touched = parse_timestamp(&fact.last_touched).unwrap_or_else(|| {
                debug!(id = %fact.id, raw = %fact.last_touched, "unparsable timestamp, using now");
                now
            });
            let age_minutes = (now - last_touched).num_milliseconds() as f64 / 60_000.0;

            if fact.confidence_score >= self.policy.promotion_threshold {
                match self.promote(&fact).await {
                    Ok(()) => report.promoted.push(fact.id),
                    Err(e) => {
                        warn!(id = %fact.id, error = %e, "promotion failed");
                        report.failures += 1;
                    }
                }
                continue;
            }

            if age_minutes > self.policy.decay_minutes && fact.confidence_score < self.policy.min_score {
                match self.scratch.delete(&fact.id).await {
                    Ok(()) => {
                        info!(id = %fact.id, age_minutes, score = fact.confidence_score, "fact forgotten");
                        report.decayed.push(fact.id);
                    }
                    Err(e) => {
                        warn!(id = %fact.id, error = %e, "decay delete failed");
                        report.failures += 1;
                    }
                }
                continue;
            }

            report.retained += 1;
        }

        if !report.promoted.is_empty() || !report.decayed.is_empty() {
            info!(
                promoted = report.promoted.len(),
                decayed = report.decayed.len(),
                retained = report.retained,
                "consolidation cycle"
            );
        }
        Ok(report)
    }

    async fn promote(&self, fact: &CandidateFact) -> Result<(), ConsolidationError> {
        let linked: Vec<String> = self
            .vectors
            .search_semantic(&fact.description, LINKED_NEIGHBOURS + 1)
            .await?
            .into_iter()
            .map(|m| m.id)
            .filter(|id| *id != fact.id)
            .take(LINKED_NEIGHBOURS)
            .collect();

        let mut metadata = Metadata::new();
        metadata.insert("original_score".into(), fact.confidence_score.into());
        metadata.insert("provenance".into(), fact.provenance.clone().into());
        metadata.insert("linked_ids".into(), linked.join(",").into());

        let consolidated = ConsolidatedFact::new(fact.id.clone(), fact.description.clone(), metadata);
        self.vectors.add_semantic(&consolidated).await?;
        self.scratch.delete(&fact.id).await?;
        info!(id = %fact.id, score = fact.confidence_score, links = linked.len(), "fact promoted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_stores;
    use chrono::Duration;

    fn fact(desc: &str, score: i64, touched: DateTime<Utc>) -> CandidateFact {
        let mut f = CandidateFact::new(desc, "perception");
        f.confidence_score = score;
        f.last_touched = touched.to_rfc3339();
        f
    }

    #[test]
    fn timestamps_parse_leniently() {
        let z = parse_timestamp("2031-02-03T04:05:06Z").unwrap();
        let offset = parse_timestamp("2031-02-03T05:05:06+01:00").unwrap();
        let naive = parse_timestamp("2031-02-03T04:05:06.250").unwrap();
        assert_eq!(z, offset);
        assert_eq!(naive.timestamp(), z.timestamp());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn fact_at_threshold_is_promoted() {
        let stores = memory_stores().await;
        let f = fact("likes the sea", 3, Utc::now());
        stores.scratch.add(&f).await.unwrap();
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());

        let report = cycle.cycle().await.unwrap();
        assert_eq!(report.promoted, vec![f.id.clone()]);
        assert!(stores.scratch.list_all().await.unwrap().is_empty());

        let recent = stores.vectors.recent_semantic(50).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, f.id);
        assert_eq!(recent[0].metadata["original_score"], 3);
        assert_eq!(recent[0].metadata["provenance"], "perception");
        assert_eq!(recent[0].metadata["linked_ids"], "");
    }

    #[tokio::test]
    async fn promotion_ignores_age() {
        let stores = memory_stores().await;
        let now = Utc::now();
        let f = fact("ancient but strong", 5, now - Duration::days(30));
        stores.scratch.add(&f).await.unwrap();
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());

        let report = cycle.cycle_at(now).await.unwrap();
        assert_eq!(report.promoted.len(), 1);
        assert!(report.decayed.is_empty());
    }

    #[tokio::test]
    async fn promotion_links_neighbours_but_not_itself() {
        let stores = memory_stores().await;
        for (id, text) in [("n1", "loves the sea"), ("n2", "swims in the sea"), ("n3", "sea sea sea")] {
            stores
                .vectors
                .add_semantic(&ConsolidatedFact::new(id, text, Metadata::new()))
                .await
                .unwrap();
        }
        let f = fact("the sea", 4, Utc::now());
        // Extraction already mirrored it under the same id.
        stores
            .vectors
            .add_semantic(&ConsolidatedFact::new(f.id.clone(), "the sea", Metadata::new()))
            .await
            .unwrap();
        stores.scratch.add(&f).await.unwrap();

        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());
        cycle.cycle().await.unwrap();

        let promoted = stores
            .vectors
            .recent_semantic(10)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.id == f.id)
            .unwrap();
        let links = promoted.metadata["linked_ids"].as_str().unwrap().to_string();
        let links: Vec<&str> = links.split(',').collect();
        assert_eq!(links.len(), LINKED_NEIGHBOURS);
        assert!(!links.contains(&f.id.as_str()));
        assert_eq!(stores.vectors.semantic_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn stale_weak_fact_decays() {
        let stores = memory_stores().await;
        let now = Utc::now();
        let stale = fact("stale", 0, now - Duration::minutes(61));
        let fresh = fact("fresh", 0, now - Duration::minutes(10));
        let steady = fact("steady", 1, now - Duration::minutes(600));
        for f in [&stale, &fresh, &steady] {
            stores.scratch.add(f).await.unwrap();
        }
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());

        let report = cycle.cycle_at(now).await.unwrap();
        assert_eq!(report.decayed, vec![stale.id.clone()]);
        assert_eq!(report.retained, 2);
        assert_eq!(stores.scratch.len().await.unwrap(), 2);
        assert_eq!(stores.vectors.semantic_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unparsable_timestamp_counts_as_fresh() {
        let stores = memory_stores().await;
        let mut f = fact("garbled", 0, Utc::now());
        f.last_touched = "not a date".into();
        stores.scratch.add(&f).await.unwrap();
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), ConsolidationPolicy::default());

        let report = cycle.cycle().await.unwrap();
        assert!(report.decayed.is_empty());
        assert_eq!(report.retained, 1);
    }

    #[tokio::test]
    async fn custom_policy_is_honoured() {
        let stores = memory_stores().await;
        let now = Utc::now();
        let f = fact("borderline", 2, now - Duration::minutes(5));
        stores.scratch.add(&f).await.unwrap();
        let policy = ConsolidationPolicy {
            promotion_threshold: 10,
            decay_minutes: 1.0,
            min_score: 3,
        };
        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), policy);
        let report = cycle.cycle_at(now).await.unwrap();
        assert_eq!(report.decayed, vec![f.id]);
    }
}
