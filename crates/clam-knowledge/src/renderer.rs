//! Knowledge renderer.
//!
//! Turns raw assertions into a sectioned, human-readable document for the
//! agent's system prompt:
//!
//! ```text
//! 📋 USER PROFILE:
//!   Name: Ada
//!   Lives in: Turin
//!
//! 🧠 THINGS CLAM HAS LEARNT ABOUT THE USER:
//!   - Has visited Lisbon
//! ```
//!
//! The pipeline is deduplicate → categorize → render. All three steps are pure;
//! only [`KnowledgeRenderer::render_document`] touches the triple store.

use std::collections::{HashMap, HashSet};

use clam_memory::triples::{TripleError, TripleStore};
use clam_types::Assertion;
use tracing::debug;

use crate::locales::Localizer;
use crate::ontology::{Category, Ontology, RenderStyle};

/// Renders assertions through an [`Ontology`].
#[derive(Debug, Clone, Copy)]
pub struct KnowledgeRenderer<'a> {
    ontology: &'a Ontology,
}

impl Default for KnowledgeRenderer<'static> {
    fn default() -> Self {
        Self::new(Ontology::shared())
    }
}

impl<'a> KnowledgeRenderer<'a> {
    pub fn new(ontology: &'a Ontology) -> Self {
        Self { ontology }
    }

    /// Collapse assertions equal under (lower-cased subject, normalized
    /// predicate, lower-cased object), keeping the highest confidence.
    ///
    /// Survivors carry the normalized predicate and keep the position of the
    /// first assertion seen for their key.
    pub fn deduplicate(&self, assertions: &[Assertion]) -> Vec<Assertion> {
        let mut order: Vec<(String, String, String)> = Vec::new();
        let mut best: HashMap<(String, String, String), Assertion> = HashMap::new();

        for a in assertions {
            let predicate = self.ontology.normalize(&a.predicate);
            let key = (
                a.subject.trim().to_lowercase(),
                predicate.clone(),
                a.object.trim().to_lowercase(),
            );
            match best.get(&key) {
                Some(existing) if a.confidence <= existing.confidence => {}
                Some(_) => {
                    best.insert(key, Assertion { predicate, ..a.clone() });
                }
                None => {
                    order.push(key.clone());
                    best.insert(key, Assertion { predicate, ..a.clone() });
                }
            }
        }

        order.into_iter().filter_map(|k| best.remove(&k)).collect()
    }

    /// Route each assertion into the first accepting category, or the
    /// ontology's fallback category. The result is parallel to `categories`.
    pub fn categorize(&self, assertions: Vec<Assertion>, categories: &[Category]) -> Vec<Vec<Assertion>> {
        let fallback = categories
            .iter()
            .position(|c| c.key == self.ontology.fallback_key());
        let mut buckets: Vec<Vec<Assertion>> = vec![Vec::new(); categories.len()];

        for a in assertions {
            let slot = categories.iter().position(|c| c.accepts(&a)).or(fallback);
            match slot {
                Some(i) => buckets[i].push(a),
                None => debug!(triple = %a, "no category and no fallback, dropped"),
            }
        }
        buckets
    }

    /// Full pure pipeline. Returns an empty string when nothing is rendered.
    pub fn render(&self, assertions: &[Assertion], categories: &[Category]) -> String {
        if assertions.is_empty() {
            return String::new();
        }
        let buckets = self.categorize(self.deduplicate(assertions), categories);

        let sections: Vec<String> = categories
            .iter()
            .zip(&buckets)
            .filter(|(_, items)| !items.is_empty())
            .map(|(category, items)| render_section(category, items))
            .collect();
        sections.join("\n\n")
    }

    /// Read every assertion from `store` and render it with labels for `lang`.
    pub async fn render_document(
        &self,
        store: &TripleStore,
        localizer: &dyn Localizer,
        lang: &str,
    ) -> Result<String, TripleError> {
        let assertions = store.all_triples().await?;
        if assertions.is_empty() {
            return Ok(String::new());
        }
        let categories = self.ontology.categories_for(localizer, lang);
        Ok(self.render(&assertions, &categories))
    }
}

fn render_section(category: &Category, items: &[Assertion]) -> String {
    let mut lines = vec![format!("{}:", category.label)];
    match category.style {
        RenderStyle::Bulleted => {
            for a in items {
                let prefix = category
                    .render_labels
                    .get(&a.predicate)
                    .map(String::as_str)
                    .unwrap_or("");
                if prefix.is_empty() {
                    lines.push(format!("  - {}", a.object));
                } else {
                    lines.push(format!("  - {prefix} {}", a.object));
                }
            }
        }
        RenderStyle::KeyValue => {
            let mut seen = HashSet::new();
            for a in items {
                if !seen.insert(a.predicate.as_str()) {
                    continue;
                }
                let label = category
                    .render_labels
                    .get(&a.predicate)
                    .cloned()
                    .unwrap_or_else(|| humanize(&a.predicate));
                lines.push(format!("  {label}: {}", a.object));
            }
        }
    }
    lines.join("\n")
}

/// `"gioca_a_calcio"` → `"Gioca A Calcio"`.
fn humanize(predicate: &str) -> String {
    let spaced = predicate.replace('_', " ");
    let mut out = String::with_capacity(spaced.len());
    let mut at_word_start = true;
    for c in spaced.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
