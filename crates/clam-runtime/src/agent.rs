//! [`ConversationAgent`] – the user-facing turn.
//!
//! A reply is generated while a [`ForegroundTurn`][crate::gate::ForegroundTurn]
//! is held, so the coordinator keeps its model calls out of the way. The
//! system prompt is the localized personality with two slots filled: the
//! rendered knowledge document and a block of semantic facts (the most recent
//! ones plus those closest to the user's message). Once the reply is ready the
//! turn is released and perception of the exchange runs in the background.

use std::collections::HashSet;
use std::sync::Arc;

use clam_knowledge::locales::{DEFAULT_LANGUAGE, Localizer, PromptKind};
use clam_knowledge::ontology::Ontology;
use clam_knowledge::renderer::KnowledgeRenderer;
use clam_memory::triples::TripleError;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::extraction::InferenceEngine;
use crate::gate::ForegroundGate;
use crate::llm_driver::{ChatMessage, Completion, LanguageModel, generate_or_empty};
use crate::stores::MemoryStores;

/// Messages of prior conversation sent with each request.
pub const HISTORY_LIMIT: usize = 20;
/// Most recent semantic facts placed in the context block.
pub const RECENT_FACTS: usize = 20;
/// Semantic facts closest to the user's message placed in the context block.
pub const RELATED_FACTS: usize = 3;
/// The debate reviewer's approval must appear within this many characters.
const APPROVAL_WINDOW: usize = 20;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Could not render the knowledge document: {0}")]
    Knowledge(#[from] TripleError),
    #[error("The model produced no reply")]
    NoReply,
}

/// A finished reply and the background perception of its turn.
#[derive(Debug)]
pub struct Reply {
    pub text: String,
    pub perception: JoinHandle<()>,
}

pub struct ConversationAgent {
    model: Arc<dyn LanguageModel>,
    localizer: Arc<dyn Localizer>,
    ontology: Arc<Ontology>,
    stores: MemoryStores,
    engine: Arc<InferenceEngine>,
    gate: ForegroundGate,
    language: String,
    internal_debate: bool,
    history: Mutex<Vec<ChatMessage>>,
}

impl ConversationAgent {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        localizer: Arc<dyn Localizer>,
        ontology: Arc<Ontology>,
        stores: MemoryStores,
        engine: Arc<InferenceEngine>,
        gate: ForegroundGate,
    ) -> Self {
        Self {
            model,
            localizer,
            ontology,
            stores,
            engine,
            gate,
            language: DEFAULT_LANGUAGE.to_string(),
            internal_debate: false,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Have a reviewer check every draft before it is returned.
    pub fn with_internal_debate(mut self, enabled: bool) -> Self {
        self.internal_debate = enabled;
        self
    }

    /// Forget the running conversation.
    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    pub async fn reply(&self, user: &str) -> Result<Reply, AgentError> {
        let turn = self.gate.enter();

        let system = self.system_prompt(user).await?;
        let history = self.history.lock().await.clone();
        let request = Completion::new(system, user).with_history(history);

        let draft = generate_or_empty(self.model.as_ref(), &request).await;
        let draft = draft.trim();
        if draft.is_empty() {
            return Err(AgentError::NoReply);
        }
        let text = if self.internal_debate {
            self.debate(draft).await
        } else {
            draft.to_string()
        };

        self.remember(user, &text).await;
        drop(turn);

        let engine = Arc::clone(&self.engine);
        let (user_turn, agent_turn) = (user.to_string(), text.clone());
        let perception = tokio::spawn(async move { engine.perceive(&user_turn, &agent_turn).await });
        Ok(Reply { text, perception })
    }

    /// The personality prompt with its knowledge and context slots filled.
    pub async fn system_prompt(&self, user: &str) -> Result<String, AgentError> {
        let document = KnowledgeRenderer::new(&self.ontology)
            .render_document(&self.stores.triples, self.localizer.as_ref(), &self.language)
            .await?;
        let strings = self.localizer.strings(&self.language);
        let knowledge = knowledge_banner(&strings.doc_header, &document);

        let facts = self.related_facts(user).await;
        let body = if facts.is_empty() {
            strings.no_observed.clone()
        } else {
            facts.iter().map(|f| format!("- {f}")).collect::<Vec<_>>().join("\n")
        };
        let context = format!("\n--- {} ---\n{body}\n-----------------------", strings.observed_header);

        Ok(self
            .localizer
            .prompt_for(PromptKind::Personality, &self.language)
            .replace("{knowledge_document}", &knowledge)
            .replace("{context_block}", &context))
    }

    /// Recent semantic facts followed by those closest to `query`, each once.
    async fn related_facts(&self, query: &str) -> Vec<String> {
        let mut facts: Vec<String> = match self.stores.vectors.recent_semantic(RECENT_FACTS).await {
            Ok(recent) => recent.into_iter().map(|f| f.description).collect(),
            Err(e) => {
                warn!(error = %e, "recent semantic facts unavailable");
                Vec::new()
            }
        };
        match self.stores.vectors.search_semantic(query, RELATED_FACTS).await {
            Ok(matches) => facts.extend(matches.into_iter().map(|m| m.document)),
            Err(e) => warn!(error = %e, "semantic search failed"),
        }
        let mut seen = HashSet::new();
        facts.retain(|f| seen.insert(f.clone()));
        facts
    }

    async fn debate(&self, draft: &str) -> String {
        let system = self.localizer.prompt_for(PromptKind::Debate, &self.language);
        let probe = self
            .localizer
            .strings(&self.language)
            .debate_probe
            .replace("{draft}", draft);
        let review = generate_or_empty(self.model.as_ref(), &Completion::new(system, probe)).await;
        let review = review.trim();

        let token = self.localizer.approval_token(&self.language).to_uppercase();
        let opening: String = review.chars().take(APPROVAL_WINDOW).collect::<String>().to_uppercase();
        if review.is_empty() || opening.contains(&token) {
            debug!("draft approved by reviewer");
            draft.to_string()
        } else {
            info!(draft, revised = review, "draft revised by reviewer");
            review.to_string()
        }
    }

    async fn remember(&self, user: &str, reply: &str) {
        let mut history = self.history.lock().await;
        history.push(ChatMessage::user(user));
        history.push(ChatMessage::assistant(reply));
        let excess = history.len().saturating_sub(HISTORY_LIMIT);
        history.drain(..excess);
    }
}

/// Frame the knowledge document for the personality prompt. An empty
/// document yields an empty banner.
pub fn knowledge_banner(header: &str, document: &str) -> String {
    if document.trim().is_empty() {
        return String::new();
    }
    let rule = "═".repeat(60);
    format!("{rule}\n{header}\n{rule}\n{document}\n{rule}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedModel, memory_stores};
    use clam_knowledge::locales::BuiltinLocales;
    use clam_types::{Assertion, ConsolidatedFact, Metadata};

    fn agent(model: Arc<ScriptedModel>, stores: &MemoryStores, gate: ForegroundGate) -> ConversationAgent {
        let ontology = Arc::new(Ontology::standard());
        let localizer: Arc<dyn Localizer> = Arc::new(BuiltinLocales);
        let engine = Arc::new(InferenceEngine::new(
            model.clone(),
            localizer.clone(),
            ontology.clone(),
            stores.clone(),
        ));
        ConversationAgent::new(model, localizer, ontology, stores.clone(), engine, gate)
    }

    #[test]
    fn empty_document_has_no_banner() {
        assert_eq!(knowledge_banner("FACTS", ""), "");
        let banner = knowledge_banner("FACTS", "User:\n  Name: Ada");
        assert!(banner.starts_with('═'));
        assert!(banner.contains("FACTS\n"));
        assert!(banner.ends_with('═'));
    }

    #[tokio::test]
    async fn system_prompt_fills_both_slots() {
        let stores = memory_stores().await;
        stores.triples.add(&Assertion::new("Utente", "ha_nome", "Ada", 5)).await.unwrap();
        stores
            .vectors
            .add_semantic(&ConsolidatedFact::new("f1", "Ada sails on weekends", Metadata::new()))
            .await
            .unwrap();
        let agent = agent(ScriptedModel::new(Vec::<&str>::new()), &stores, ForegroundGate::new());

        let prompt = agent.system_prompt("sailing").await.unwrap();
        assert!(prompt.contains("Ada"));
        assert!(prompt.contains("- Ada sails on weekends"));
        assert_eq!(prompt.matches("Ada sails on weekends").count(), 1);
        assert!(!prompt.contains("{knowledge_document}"));
        assert!(!prompt.contains("{context_block}"));
    }

    #[tokio::test]
    async fn reply_holds_the_gate_then_perceives() {
        let stores = memory_stores().await;
        let gate = ForegroundGate::new();
        let model = ScriptedModel::new([
            "Boats! Do they float forever?",
            r#"{"concetti":["The user sails"],"triple_logiche":[{"subject":"Utente","predicate":"hobby","object":"vela"}]}"#,
        ]);
        let agent = agent(model.clone(), &stores, gate.clone());

        let reply = agent.reply("I love sailing").await.unwrap();
        assert_eq!(reply.text, "Boats! Do they float forever?");
        assert!(!gate.is_active());
        reply.perception.await.unwrap();

        assert_eq!(stores.triples.count().await.unwrap(), 1);
        assert_eq!(stores.scratch.len().await.unwrap(), 1);
        let calls = model.calls();
        assert_eq!(calls[0].prompt, "I love sailing");
        assert!(calls[1].prompt.contains("User: I love sailing"));
    }

    #[tokio::test]
    async fn history_is_carried_and_capped() {
        let stores = memory_stores().await;
        let replies: Vec<String> = (0..15).map(|i| format!("reply {i}")).collect();
        // Each turn is followed by an extraction call that gets an empty answer.
        let script: Vec<&str> = replies.iter().flat_map(|r| [r.as_str(), ""]).collect();
        let model = ScriptedModel::new(script);
        let agent = agent(model.clone(), &stores, ForegroundGate::new());

        for i in 0..15 {
            let reply = agent.reply(&format!("turn {i}")).await.unwrap();
            reply.perception.await.unwrap();
        }
        let last = model
            .calls()
            .into_iter()
            .filter(|c| c.prompt == "turn 14")
            .last()
            .unwrap();
        assert_eq!(last.history.len(), HISTORY_LIMIT);
        assert_eq!(last.history.last().unwrap().content, "reply 13");
    }

    #[tokio::test]
    async fn empty_draft_is_an_error() {
        let stores = memory_stores().await;
        let gate = ForegroundGate::new();
        let agent = agent(ScriptedModel::new(["  "]), &stores, gate.clone());
        assert!(matches!(agent.reply("hello").await, Err(AgentError::NoReply)));
        assert!(!gate.is_active());
    }

    #[tokio::test]
    async fn debate_keeps_approved_drafts_and_takes_rewrites() {
        let stores = memory_stores().await;
        let model = ScriptedModel::new(["draft one", "**APPROVED**", "", "draft two", "A safer reply.", ""]);
        let agent = agent(model, &stores, ForegroundGate::new()).with_internal_debate(true);

        let first = agent.reply("a").await.unwrap();
        first.perception.await.unwrap();
        assert_eq!(first.text, "draft one");

        let second = agent.reply("b").await.unwrap();
        second.perception.await.unwrap();
        assert_eq!(second.text, "A safer reply.");
    }
}
