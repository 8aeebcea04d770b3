//! [`CriticEngine`] – adversarial review of buffered facts.
//!
//! Each buffered fact is put to the model with a devil's-advocate prompt. A
//! reply that opens with the localized approval token moves the fact's score
//! up by one; anything else moves it down by one and the reply is logged as
//! the contestation. A transport failure leaves the fact untouched.
//!
//! The scan checks the [`ForegroundGate`] before every fact and stops as soon
//! as a user turn is in flight; the remaining facts wait for the next tick.

use std::sync::Arc;

use clam_knowledge::locales::{DEFAULT_LANGUAGE, Localizer, PromptKind};
use clam_memory::scratch::{ScratchBuffer, ScratchError};
use clam_types::{CandidateFact, now_rfc3339};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gate::ForegroundGate;
use crate::llm_driver::{Completion, LanguageModel};

#[derive(Error, Debug)]
pub enum CriticError {
    #[error("Scratch buffer error: {0}")]
    Buffer(#[from] ScratchError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriticReport {
    pub approved: usize,
    pub contested: usize,
    /// Facts left untouched because the model could not be reached.
    pub unreachable: usize,
    /// `true` if a foreground turn stopped the scan early.
    pub interrupted: bool,
}

/// `true` if `reply` opens with `token`, ignoring case, surrounding
/// whitespace, quotes and markdown emphasis.
pub fn is_approval(reply: &str, token: &str) -> bool {
    let cleaned = reply
        .trim()
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '*' | '_' | '`' | '«' | '“'))
        .to_uppercase();
    !token.is_empty() && cleaned.starts_with(&token.to_uppercase())
}

pub struct CriticEngine {
    model: Arc<dyn LanguageModel>,
    localizer: Arc<dyn Localizer>,
    scratch: Arc<ScratchBuffer>,
    gate: ForegroundGate,
    language: String,
}

impl CriticEngine {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        localizer: Arc<dyn Localizer>,
        scratch: Arc<ScratchBuffer>,
        gate: ForegroundGate,
    ) -> Self {
        Self {
            model,
            localizer,
            scratch,
            gate,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Review every buffered fact once.
    pub async fn scan(&self) -> Result<CriticReport, CriticError> {
        let facts = self.scratch.list_all().await?;
        let mut report = CriticReport::default();
        if facts.is_empty() {
            return Ok(report);
        }
        info!(facts = facts.len(), "critic scan started");

        for fact in &facts {
            if self.gate.is_active() {
                info!("critic scan paused for a foreground turn");
                report.interrupted = true;
                break;
            }
            self.evaluate(fact, &mut report).await?;
        }
        Ok(report)
    }

    async fn evaluate(&self, fact: &CandidateFact, report: &mut CriticReport) -> Result<(), CriticError> {
        let system = self.localizer.prompt_for(PromptKind::Critic, &self.language);
        let probe = self
            .localizer
            .strings(&self.language)
            .critic_probe
            .replace("{fact}", &fact.description);

        let reply = match self.model.generate(&Completion::new(system, probe)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(id = %fact.id, error = %e, "critic could not reach the model");
                report.unreachable += 1;
                return Ok(());
            }
        };

        let token = self.localizer.approval_token(&self.language);
        if is_approval(&reply, &token) {
            debug!(id = %fact.id, "fact approved");
            self.scratch.adjust_score(&fact.id, 1, &now_rfc3339()).await?;
            report.approved += 1;
        } else {
            info!(id = %fact.id, rationale = %reply.trim(), "fact contested");
            self.scratch.adjust_score(&fact.id, -1, &now_rfc3339()).await?;
            report.contested += 1;
        }
        Ok(())
    }
}
