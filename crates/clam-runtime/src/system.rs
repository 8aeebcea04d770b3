//! [`MemorySystem`] – every component wired to one set of stores.
//!
//! The stores are constructed once, here, and handed to each component. The
//! methods on [`MemorySystem`] are the operations a conversation surface
//! needs: chat, inspect, forget, reset and seed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clam_knowledge::locales::{BuiltinLocales, DEFAULT_LANGUAGE, Localizer};
use clam_knowledge::ontology::Ontology;
use clam_knowledge::renderer::KnowledgeRenderer;
use clam_memory::scratch::{ScratchBuffer, ScratchError};
use clam_memory::triples::{TripleError, TripleStore};
use clam_memory::vector::{Embedder, SqliteIndex, VectorError, VectorStore};
use clam_types::{
    Assertion, CandidateFact, ClamError, ConsolidatedFact, MAX_CONFIDENCE, MemorySnapshot, StoreKind,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{AgentError, ConversationAgent, Reply};
use crate::consolidation::{ConsolidationCycle, ConsolidationPolicy};
use crate::coordinator::{Coordinator, DEFAULT_TICK_INTERVAL};
use crate::critic::CriticEngine;
use crate::embedder::OllamaEmbedder;
use crate::extraction::InferenceEngine;
use crate::gate::ForegroundGate;
use crate::llm_driver::{LanguageModel, LlmDriver};
use crate::seed::{SeedError, load_seed_truths, seed_if_empty};
use crate::stores::MemoryStores;

/// File names inside the data directory.
const VECTOR_DB: &str = "vectors.db";
const TRIPLE_DB: &str = "knowledge.db";

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scratch buffer error: {0}")]
    Scratch(#[from] ScratchError),
    #[error("Vector store error: {0}")]
    Vector(#[from] VectorError),
    #[error("Triple store error: {0}")]
    Triples(#[from] TripleError),
    #[error("Seed error: {0}")]
    Seed(#[from] SeedError),
    #[error("An assertion needs a subject, a predicate and an object")]
    IncompleteAssertion,
}

impl From<SystemError> for ClamError {
    fn from(e: SystemError) -> Self {
        match e {
            SystemError::Seed(e) => ClamError::Seed(e.to_string()),
            other => ClamError::Store(other.to_string()),
        }
    }
}

impl From<AgentError> for ClamError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Knowledge(e) => ClamError::Store(e.to_string()),
            other @ AgentError::NoReply => ClamError::LlmInferenceFailed(other.to_string()),
        }
    }
}

/// Everything [`MemorySystem::open`] needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    pub language: String,
    pub ollama_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    /// Holds the vector and triple databases.
    pub data_dir: PathBuf,
    pub semantic_collection: String,
    pub episodic_collection: String,
    pub policy: ConsolidationPolicy,
    pub tick_interval: Duration,
    pub critic_enabled: bool,
    pub internal_debate: bool,
    pub seed_file: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:3b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            temperature: 0.7,
            data_dir: PathBuf::from("data"),
            semantic_collection: "semantic_memory".to_string(),
            episodic_collection: "episodic_memory".to_string(),
            policy: ConsolidationPolicy::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            critic_enabled: false,
            internal_debate: false,
            seed_file: Some(PathBuf::from("seed_truths.toml")),
        }
    }
}

pub struct MemorySystem {
    config: SystemConfig,
    stores: MemoryStores,
    ontology: Arc<Ontology>,
    localizer: Arc<dyn Localizer>,
    gate: ForegroundGate,
    agent: ConversationAgent,
    coordinator: Arc<Coordinator>,
}

impl MemorySystem {
    /// Open the stores under `config.data_dir` and talk to the Ollama server
    /// named in `config`.
    pub async fn open(config: SystemConfig) -> Result<Self, SystemError> {
        let model = Arc::new(LlmDriver::new(&config.ollama_url, &config.model).with_temperature(config.temperature));
        let embedder = Arc::new(OllamaEmbedder::new(&config.ollama_url, &config.embedding_model));
        Self::with_services(config, model, embedder).await
    }

    /// Like [`open`](Self::open) with caller-supplied model and embedder.
    pub async fn with_services(
        config: SystemConfig,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, SystemError> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let index = SqliteIndex::open(&config.data_dir.join(VECTOR_DB).to_string_lossy(), embedder)?;
        let vectors = VectorStore::new(Box::new(index), &config.semantic_collection, &config.episodic_collection).await?;
        let triples = TripleStore::new(config.data_dir.join(TRIPLE_DB));
        triples.open().await?;
        let stores = MemoryStores::new(ScratchBuffer::new()?, vectors, triples);

        let ontology = Arc::new(Ontology::standard());
        let localizer: Arc<dyn Localizer> = Arc::new(BuiltinLocales);
        let gate = ForegroundGate::new();

        let engine = Arc::new(
            InferenceEngine::new(model.clone(), localizer.clone(), ontology.clone(), stores.clone())
                .with_language(&config.language),
        );
        let agent = ConversationAgent::new(
            model.clone(),
            localizer.clone(),
            ontology.clone(),
            stores.clone(),
            engine,
            gate.clone(),
        )
        .with_language(&config.language)
        .with_internal_debate(config.internal_debate);

        let cycle = ConsolidationCycle::new(stores.scratch.clone(), stores.vectors.clone(), config.policy);
        let mut coordinator = Coordinator::new(stores.clone(), cycle, gate.clone()).with_interval(config.tick_interval);
        if config.critic_enabled {
            let critic = CriticEngine::new(model, localizer.clone(), stores.scratch.clone(), gate.clone())
                .with_language(&config.language);
            coordinator = coordinator.with_critic(critic);
        }

        if let Some(seed) = &config.seed_file {
            let seeded = seed_if_empty(seed, &stores.triples, &ontology).await?;
            if seeded > 0 {
                info!(seeded, "empty knowledge base seeded");
            }
        }

        info!(data_dir = %config.data_dir.display(), model = %config.model, language = %config.language, "memory system ready");
        Ok(Self {
            config,
            stores,
            ontology,
            localizer,
            gate,
            agent,
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn gate(&self) -> &ForegroundGate {
        &self.gate
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Start the background tick. It stops when `shutdown` turns `true`.
    pub fn spawn_coordinator(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.coordinator().spawn(shutdown)
    }

    /// Submit a user turn and get the reply.
    pub async fn chat(&self, message: &str) -> Result<Reply, AgentError> {
        self.agent.reply(message).await
    }

    /// Delete one item from one store.
    pub async fn forget(&self, store: StoreKind, id: &str) -> Result<(), SystemError> {
        match store {
            StoreKind::Scratch => self.stores.scratch.delete(id).await?,
            StoreKind::Vector => self.stores.vectors.delete_semantic(id).await?,
            StoreKind::Graph => self.stores.triples.delete_by_id(id).await?,
        }
        info!(%store, id, "item forgotten");
        Ok(())
    }

    /// Wipe all three stores and the running conversation.
    pub async fn reset(&self) -> Result<(), SystemError> {
        self.stores.scratch.clear().await?;
        self.stores.vectors.clear().await?;
        self.stores.triples.clear().await?;
        self.agent.clear_history().await;
        info!("all memory wiped");
        Ok(())
    }

    /// [`reset`](Self::reset), then [`load_seed`](Self::load_seed).
    pub async fn reset_and_seed(&self) -> Result<usize, SystemError> {
        self.reset().await?;
        self.load_seed().await
    }

    /// Load the configured seed file. Without one, nothing is loaded.
    pub async fn load_seed(&self) -> Result<usize, SystemError> {
        match &self.config.seed_file {
            Some(path) => Ok(load_seed_truths(path, &self.stores.triples, &self.ontology).await?),
            None => Ok(0),
        }
    }

    /// The rendered knowledge document; empty when nothing is known.
    pub async fn knowledge_document(&self) -> Result<String, TripleError> {
        KnowledgeRenderer::new(&self.ontology)
            .render_document(&self.stores.triples, self.localizer.as_ref(), &self.config.language)
            .await
    }

    /// What surfaces print in place of an empty knowledge document.
    pub fn no_facts_text(&self) -> String {
        self.localizer.strings(&self.config.language).no_facts
    }

    /// Add an assertion by hand at full confidence.
    pub async fn assert_triple(&self, subject: &str, predicate: &str, object: &str) -> Result<Assertion, SystemError> {
        let predicate = self.ontology.normalize(predicate);
        let (subject, object) = (subject.trim(), object.trim());
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return Err(SystemError::IncompleteAssertion);
        }
        let assertion = Assertion::new(subject, predicate, object, MAX_CONFIDENCE);
        self.stores.triples.add(&assertion).await?;
        info!(triple = %assertion, "assertion added by hand");
        Ok(assertion)
    }

    pub async fn retract_triple(&self, id: &str) -> Result<(), SystemError> {
        self.forget(StoreKind::Graph, id).await
    }

    pub async fn snapshot(&self) -> MemorySnapshot {
        self.stores.snapshot().await
    }

    pub async fn buffered_facts(&self) -> Result<Vec<CandidateFact>, SystemError> {
        Ok(self.stores.scratch.list_all().await?)
    }

    pub async fn semantic_facts(&self, limit: usize) -> Result<Vec<ConsolidatedFact>, SystemError> {
        Ok(self.stores.vectors.recent_semantic(limit).await?)
    }

    pub async fn triples(&self) -> Result<Vec<Assertion>, SystemError> {
        Ok(self.stores.triples.all_triples().await?)
    }
}
