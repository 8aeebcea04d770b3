//! `clam-knowledge` – What the agent knows, and how it is said.
//!
//! # Modules
//!
//! - [`ontology`] – [`Ontology`][ontology::Ontology]: the controlled vocabulary
//!   of categories and canonical predicates, plus the alias normalizer.
//! - [`locales`] – [`Localizer`][locales::Localizer]: prompt templates,
//!   category labels and short phrases per language.
//! - [`renderer`] – [`KnowledgeRenderer`][renderer::KnowledgeRenderer]: turns
//!   stored assertions into the natural-language knowledge document.

pub mod locales;
pub mod ontology;
pub mod renderer;
