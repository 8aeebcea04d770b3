//! [`InferenceEngine`] – turns a dialogue turn into memory writes.
//!
//! For every completed turn the engine asks the model, in JSON mode, for
//! three lists:
//!
//! * `concetti` – free-text facts about the user (at most [`MAX_FACTS`]);
//! * `triple_logiche` – assertions to add;
//! * `triple_logiche_da_cancellare` – assertions the user just contradicted.
//!
//! The raw reply is validated once, in [`ExtractionPayload::parse`]; past that
//! point everything is typed. Facts go to the scratch buffer *and* straight
//! into the semantic collection. Assertions are normalized, filtered
//! (nothing about the agent itself), and upserted at full confidence.
//! Retractions delete by exact case-insensitive pattern.

use std::collections::HashSet;
use std::sync::Arc;

use clam_knowledge::locales::{Localizer, PromptKind};
use clam_knowledge::ontology::Ontology;
use clam_memory::triples::TripleError;
use clam_types::{
    AGENT_ENTITY, Assertion, CandidateFact, ConsolidatedFact, MAX_CONFIDENCE, Metadata, USER_ENTITY,
};
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::llm_driver::{Completion, LanguageModel, generate_or_empty};
use crate::stores::MemoryStores;

/// Upper bound on free-text facts taken from one turn.
pub const MAX_FACTS: usize = 2;

/// Provenance recorded on every fact this engine writes.
pub const PERCEPTION: &str = "perception";

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// One assertion as proposed by the model. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct TripleDraft {
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub predicate: Option<String>,
    #[serde(default, alias = "object_", deserialize_with = "lenient_string")]
    #[schemars(with = "Option<String>")]
    pub object: Option<String>,
}

impl TripleDraft {
    /// The three fields, trimmed, if all of them are present and non-empty.
    fn complete(&self) -> Option<(&str, &str, &str)> {
        Some((
            non_empty(&self.subject)?,
            non_empty(&self.predicate)?,
            non_empty(&self.object)?,
        ))
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// The validated shape of an extraction reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct ExtractionPayload {
    #[serde(rename = "concetti", default, deserialize_with = "lenient_vec")]
    #[schemars(with = "Vec<String>")]
    pub facts: Vec<String>,
    #[serde(rename = "triple_logiche", default, deserialize_with = "lenient_vec")]
    #[schemars(with = "Vec<TripleDraft>")]
    pub assertions: Vec<TripleDraft>,
    #[serde(rename = "triple_logiche_da_cancellare", default, deserialize_with = "lenient_vec")]
    #[schemars(with = "Vec<TripleDraft>")]
    pub retractions: Vec<TripleDraft>,
}

impl ExtractionPayload {
    /// Parse a model reply. Text around the outermost JSON object (code
    /// fences, a leading sentence) is ignored.
    pub fn parse(raw: &str) -> Result<Self, PerceptionError> {
        let body = match (raw.find('{'), raw.rfind('}')) {
            (Some(start), Some(end)) if start < end => &raw[start..=end],
            _ => raw,
        };
        serde_json::from_str(body).map_err(PerceptionError::Malformed)
    }

    /// JSON Schema sent with the request.
    pub fn schema() -> Option<serde_json::Value> {
        serde_json::to_value(schema_for!(ExtractionPayload)).ok()
    }
}

/// Array whose unusable entries are dropped instead of failing the payload.
fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// Scalars become strings (`30` → `"30"`); anything else is absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PerceptionError {
    #[error("Model returned an empty reply")]
    EmptyResponse,
    #[error("Model reply is not a valid extraction payload: {0}")]
    Malformed(serde_json::Error),
    #[error("Could not read current assertions: {0}")]
    Triples(#[from] TripleError),
}

/// What one turn changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerceptionReport {
    pub facts_buffered: usize,
    pub facts_mirrored: usize,
    pub assertions_added: usize,
    pub assertions_blocked: usize,
    pub assertions_incomplete: usize,
    /// Rows removed by retraction.
    pub assertions_retracted: usize,
    pub write_failures: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// InferenceEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Extraction stage.
pub struct InferenceEngine {
    model: Arc<dyn LanguageModel>,
    localizer: Arc<dyn Localizer>,
    ontology: Arc<Ontology>,
    stores: MemoryStores,
    language: String,
}

impl InferenceEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        localizer: Arc<dyn Localizer>,
        ontology: Arc<Ontology>,
        stores: MemoryStores,
    ) -> Self {
        Self {
            model,
            localizer,
            ontology,
            stores,
            language: clam_knowledge::locales::DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Learn from one turn, logging instead of failing.
    pub async fn perceive(&self, user_turn: &str, agent_turn: &str) {
        match self.try_perceive(user_turn, agent_turn).await {
            Ok(report) => info!(?report, "perception finished"),
            Err(PerceptionError::Triples(e)) => error!(error = %e, "perception aborted: triple store unavailable"),
            Err(e) => warn!(error = %e, "perception skipped"),
        }
    }

    /// Learn from one turn and report what was written.
    pub async fn try_perceive(&self, user_turn: &str, agent_turn: &str) -> Result<PerceptionReport, PerceptionError> {
        let truths = self.current_truths().await?;
        let request = self.build_request(&truths, user_turn, agent_turn);

        let raw = generate_or_empty(self.model.as_ref(), &request).await;
        if raw.trim().is_empty() {
            return Err(PerceptionError::EmptyResponse);
        }
        debug!(raw = %raw, "extraction reply");
        let payload = ExtractionPayload::parse(&raw)?;

        let mut report = PerceptionReport::default();
        self.save_facts(&payload.facts, &mut report).await;
        self.save_assertions(&payload.assertions, &mut report).await;
        self.apply_retractions(&payload.retractions, &mut report).await;
        Ok(report)
    }

    /// Assertions about the user and the agent, each listed once.
    async fn current_truths(&self) -> Result<Vec<Assertion>, TripleError> {
        let mut truths = self.stores.triples.by_entity(USER_ENTITY).await?;
        truths.extend(self.stores.triples.by_entity(AGENT_ENTITY).await?);
        let mut seen = HashSet::new();
        truths.retain(|t| seen.insert(t.id.clone()));
        Ok(truths)
    }

    fn build_request(&self, truths: &[Assertion], user_turn: &str, agent_turn: &str) -> Completion {
        let strings = self.localizer.strings(&self.language);
        let system = self
            .localizer
            .prompt_for(PromptKind::Extraction, &self.language)
            .replace("{allowed_predicates}", &self.ontology.allowed_predicates_text());

        let truths_block = if truths.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = truths.iter().map(|t| format!("- {t}")).collect();
            format!("\n{}\n{}\n{}\n", strings.truths_header, lines.join("\n"), strings.truths_hint)
        };
        let prompt = format!(
            "{truths_block}\nUser: {user_turn}\nAssistant: {agent_turn}\n\n{}",
            strings.extraction_request
        );

        let request = Completion::new(system, prompt);
        match ExtractionPayload::schema() {
            Some(schema) => request.with_json_schema(schema),
            None => request,
        }
    }

    async fn save_facts(&self, facts: &[String], report: &mut PerceptionReport) {
        let usable: Vec<&str> = facts.iter().map(|f| f.trim()).filter(|f| !f.is_empty()).collect();
        if usable.len() > MAX_FACTS {
            debug!(offered = usable.len(), kept = MAX_FACTS, "extra facts dropped");
        }
        for description in usable.into_iter().take(MAX_FACTS) {
            let fact = CandidateFact::new(description, PERCEPTION);
            match self.stores.scratch.add(&fact).await {
                Ok(()) => report.facts_buffered += 1,
                Err(e) => {
                    warn!(id = %fact.id, error = %e, "buffer write failed");
                    report.write_failures += 1;
                }
            }

            let mut metadata = Metadata::new();
            metadata.insert("provenance".into(), PERCEPTION.into());
            metadata.insert("direct_write".into(), true.into());
            let durable = ConsolidatedFact::new(fact.id.clone(), description, metadata);
            match self.stores.vectors.add_semantic(&durable).await {
                Ok(()) => {
                    info!(id = %fact.id, fact = description, "fact learnt");
                    report.facts_mirrored += 1;
                }
                Err(e) => {
                    warn!(id = %fact.id, error = %e, "semantic write failed");
                    report.write_failures += 1;
                }
            }
        }
    }

    fn is_agent(subject: &str) -> bool {
        subject.to_lowercase() == AGENT_ENTITY.to_lowercase()
    }

    async fn save_assertions(&self, drafts: &[TripleDraft], report: &mut PerceptionReport) {
        for draft in drafts {
            let Some((subject, raw_predicate, object)) = draft.complete() else {
                debug!(?draft, "incomplete assertion ignored");
                report.assertions_incomplete += 1;
                continue;
            };
            if Self::is_agent(subject) {
                warn!(subject, predicate = raw_predicate, object, "assertion about the agent blocked");
                report.assertions_blocked += 1;
                continue;
            }
            let predicate = self.ontology.normalize(raw_predicate);
            if predicate != raw_predicate {
                debug!(from = raw_predicate, to = %predicate, "predicate normalized");
            }
            let assertion = Assertion::new(subject, predicate, object, MAX_CONFIDENCE);
            match self.stores.triples.add(&assertion).await {
                Ok(()) => {
                    info!(triple = %assertion, "assertion learnt");
                    report.assertions_added += 1;
                }
                Err(e) => {
                    warn!(triple = %assertion, error = %e, "assertion write failed");
                    report.write_failures += 1;
                }
            }
        }
    }

    async fn apply_retractions(&self, drafts: &[TripleDraft], report: &mut PerceptionReport) {
        for draft in drafts {
            let Some((subject, raw_predicate, object)) = draft.complete() else {
                report.assertions_incomplete += 1;
                continue;
            };
            let predicate = self.ontology.normalize(raw_predicate);
            match self
                .stores
                .triples
                .delete_by_exact_pattern(subject, &predicate, object)
                .await
            {
                Ok(removed) => {
                    info!(subject, predicate = %predicate, object, removed, "assertion retracted");
                    report.assertions_retracted += removed;
                }
                Err(e) => {
                    warn!(subject, predicate = %predicate, object, error = %e, "retraction failed");
                    report.write_failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FlakyEmbedder, ScriptedModel, memory_stores, memory_stores_with};
    use clam_knowledge::locales::BuiltinLocales;

    fn engine(model: Arc<ScriptedModel>, stores: MemoryStores) -> InferenceEngine {
        InferenceEngine::new(model, Arc::new(BuiltinLocales), Arc::new(Ontology::standard()), stores)
    }

    #[test]
    fn payload_parses_full_reply() {
        let p = ExtractionPayload::parse(
            r#"{"concetti":["likes jazz"],
                "triple_logiche":[{"subject":"Utente","predicate":"ha_eta","object":41}],
                "triple_logiche_da_cancellare":[{"subject":"Utente","predicate":"vive_a","object_":"Roma"}]}"#,
        )
        .unwrap();
        assert_eq!(p.facts, vec!["likes jazz"]);
        assert_eq!(p.assertions[0].object.as_deref(), Some("41"));
        assert_eq!(p.retractions[0].object.as_deref(), Some("Roma"));
    }

    #[test]
    fn payload_tolerates_missing_fields_and_junk_entries() {
        let p = ExtractionPayload::parse(
            "```json\n{\"concetti\": [\"ok\", 3, null], \"triple_logiche\": [\"nope\", {\"subject\": \"Utente\"}]}\n```",
        )
        .unwrap();
        assert_eq!(p.facts, vec!["ok"]);
        assert_eq!(p.assertions.len(), 1);
        assert!(p.assertions[0].complete().is_none());
        assert!(p.retractions.is_empty());
    }

    #[test]
    fn payload_rejects_non_json() {
        assert!(matches!(
            ExtractionPayload::parse("I could not find any facts."),
            Err(PerceptionError::Malformed(_))
        ));
    }

    #[test]
    fn schema_names_the_three_fields() {
        let schema = ExtractionPayload::schema().unwrap().to_string();
        assert!(schema.contains("concetti"));
        assert!(schema.contains("triple_logiche"));
        assert!(schema.contains("triple_logiche_da_cancellare"));
    }

    #[tokio::test]
    async fn facts_are_buffered_and_mirrored_with_same_id() {
        let stores = memory_stores().await;
        let model = ScriptedModel::new([r#"{"concetti":["plays the cello","has two cats","runs"]}"#]);
        let report = engine(model, stores.clone()).try_perceive("hi", "hello").await.unwrap();

        assert_eq!(report.facts_buffered, MAX_FACTS);
        assert_eq!(report.facts_mirrored, MAX_FACTS);

        let buffered = stores.scratch.list_all().await.unwrap();
        assert_eq!(buffered.len(), 2);
        assert!(buffered.iter().all(|f| f.provenance == PERCEPTION && f.confidence_score == 1));

        let durable = stores.vectors.recent_semantic(10).await.unwrap();
        let ids: HashSet<_> = durable.iter().map(|f| f.id.clone()).collect();
        assert!(buffered.iter().all(|f| ids.contains(&f.id)));
        assert_eq!(durable[0].metadata["direct_write"], true);
    }

    #[tokio::test]
    async fn assertions_are_normalized_and_stored_at_full_confidence() {
        let stores = memory_stores().await;
        let model = ScriptedModel::new([
            r#"{"concetti":[],"triple_logiche":[{"subject":"Utente","predicate":"Si_Chiama","object":"Ada"}],"triple_logiche_da_cancellare":[]}"#,
        ]);
        let report = engine(model, stores.clone()).try_perceive("I'm Ada", "Hi Ada!").await.unwrap();
        assert_eq!(report.assertions_added, 1);

        let all = stores.triples.all_triples().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].predicate, "ha_nome");
        assert_eq!(all[0].confidence, MAX_CONFIDENCE);
    }

    #[tokio::test]
    async fn assertions_about_the_agent_are_never_stored() {
        let stores = memory_stores().await;
        let model = ScriptedModel::new([
            r#"{"triple_logiche":[
                {"subject":"clam","predicate":"preferisce_animale","object":"cani"},
                {"subject":" CLAM ","predicate":"è","object":"umano"},
                {"subject":"Utente","predicate":"hobby","object":"vela"}]}"#,
        ]);
        let report = engine(model, stores.clone()).try_perceive("x", "y").await.unwrap();
        assert_eq!(report.assertions_blocked, 2);
        assert_eq!(report.assertions_added, 1);

        let all = stores.triples.all_triples().await.unwrap();
        assert!(all.iter().all(|t| !t.subject.eq_ignore_ascii_case("clam")));
    }

    #[tokio::test]
    async fn failed_write_is_counted_and_batch_continues() {
        let stores = memory_stores_with(FlakyEmbedder::failing_first(1)).await;
        let model = ScriptedModel::new([
            r#"{"concetti":["owns a kayak","speaks Greek"],
                "triple_logiche":[{"subject":"Utente","predicate":"vive_a","object":"Bari"}]}"#,
        ]);
        let report = engine(model, stores.clone()).try_perceive("x", "y").await.unwrap();

        assert_eq!(report.write_failures, 1);
        assert_eq!(report.facts_buffered, 2);
        assert_eq!(report.facts_mirrored, 1);
        assert_eq!(report.assertions_added, 1);

        let durable = stores.vectors.recent_semantic(10).await.unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].description, "speaks Greek");
        assert_eq!(stores.triples.all_triples().await.unwrap()[0].object, "Bari");
    }

    #[tokio::test]
    async fn retraction_accepts_either_object_key() {
        let stores = memory_stores().await;
        stores.triples.add(&Assertion::new("Utente", "vive_a", "ROMA", 5)).await.unwrap();
        stores.triples.add(&Assertion::new("Utente", "ha_lavoro", "cuoco", 5)).await.unwrap();
        stores.triples.add(&Assertion::new("Utente", "hobby", "vela", 5)).await.unwrap();

        let model = ScriptedModel::new([
            r#"{"triple_logiche_da_cancellare":[
                {"subject":"utente","predicate":"vive_a","object":"Roma"},
                {"subject":"Utente","predicate":"professione","object_":"Cuoco"}]}"#,
        ]);
        let report = engine(model, stores.clone()).try_perceive("x", "y").await.unwrap();
        assert_eq!(report.assertions_retracted, 2);

        let left = stores.triples.all_triples().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].predicate, "hobby");
    }

    #[tokio::test]
    async fn prompt_carries_truths_predicates_and_turn() {
        let stores = memory_stores().await;
        stores.triples.add(&Assertion::new("Utente", "ha_nome", "Ada", 5)).await.unwrap();
        stores.triples.add(&Assertion::new("CLAM", "è", "un robot", 5)).await.unwrap();
        let model = ScriptedModel::new([r#"{}"#]);
        engine(model.clone(), stores).try_perceive("I moved", "Where to?").await.unwrap();

        let call = &model.calls()[0];
        assert!(call.system_prompt.contains("ha_nome, ha_eta"));
        assert!(!call.system_prompt.contains("{allowed_predicates}"));
        assert!(call.prompt.contains("- Utente -> ha_nome -> Ada"));
        assert!(call.prompt.contains("- CLAM -> è -> un robot"));
        assert!(call.prompt.contains("User: I moved\nAssistant: Where to?"));
        assert!(call.json_schema.is_some());
    }

    #[tokio::test]
    async fn empty_or_failed_reply_has_no_side_effects() {
        let stores = memory_stores().await;
        let model = ScriptedModel::with_script(vec![Ok("   "), Err("connection refused")]);
        let e = engine(model, stores.clone());

        assert!(matches!(e.try_perceive("a", "b").await, Err(PerceptionError::EmptyResponse)));
        assert!(matches!(e.try_perceive("a", "b").await, Err(PerceptionError::EmptyResponse)));
        assert_eq!(stores.snapshot().await.scratch_count, 0);
        assert_eq!(stores.triples.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_skipped_by_perceive() {
        let stores = memory_stores().await;
        let model = ScriptedModel::new(["not json at all"]);
        engine(model, stores.clone()).perceive("a", "b").await;
        assert_eq!(stores.scratch.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closed_triple_store_is_reported() {
        let stores = memory_stores().await;
        stores.triples.close().await;
        let model = ScriptedModel::new([r#"{}"#]);
        let err = engine(model.clone(), stores).try_perceive("a", "b").await.unwrap_err();
        assert!(matches!(err, PerceptionError::Triples(TripleError::NotOpen)));
        assert!(model.calls().is_empty());
    }
}
