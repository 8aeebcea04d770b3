//! `clam-runtime` – the moving parts of CLAM's memory.
//!
//! Everything here talks to a language model or schedules work over the
//! stores in `clam-memory`.
//!
//! # Modules
//!
//! - [`llm_driver`] – [`LanguageModel`][llm_driver::LanguageModel] and its
//!   OpenAI-compatible HTTP implementation [`LlmDriver`][llm_driver::LlmDriver].
//! - [`embedder`] – [`OllamaEmbedder`][embedder::OllamaEmbedder], the
//!   embedding capability behind the vector store.
//! - [`gate`] – [`ForegroundGate`][gate::ForegroundGate]: keeps background
//!   model calls away from a user-facing turn.
//! - [`extraction`] – [`InferenceEngine`][extraction::InferenceEngine]: turns
//!   a dialogue turn into facts, assertions and retractions.
//! - [`critic`] – [`CriticEngine`][critic::CriticEngine]: adversarial review
//!   that moves buffered facts' scores up or down.
//! - [`consolidation`] – [`ConsolidationCycle`][consolidation::ConsolidationCycle]:
//!   promotion to the semantic collection and decay of stale facts.
//! - [`coordinator`] – [`Coordinator`][coordinator::Coordinator]: the periodic
//!   background tick.
//! - [`agent`] – [`ConversationAgent`][agent::ConversationAgent]: replies to
//!   the user with the knowledge document in its prompt.
//! - [`seed`] – bootstrap loader for trusted assertions.
//! - [`system`] – [`MemorySystem`][system::MemorySystem]: wires it all
//!   together over one set of stores.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing].

pub mod agent;
pub mod consolidation;
pub mod coordinator;
pub mod critic;
pub mod embedder;
pub mod extraction;
pub mod gate;
pub mod llm_driver;
pub mod seed;
pub mod stores;
pub mod system;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{AgentError, ConversationAgent, Reply};
pub use consolidation::{ConsolidationCycle, ConsolidationPolicy, CycleReport};
pub use coordinator::{Coordinator, TickReport};
pub use gate::{ForegroundGate, ForegroundTurn};
pub use llm_driver::{ChatMessage, Completion, LanguageModel, LlmDriver, LlmError, Role};
pub use stores::MemoryStores;
pub use system::{MemorySystem, SystemConfig, SystemError};
pub use telemetry::{TracerProviderGuard, init_tracing};
