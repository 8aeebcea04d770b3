//! Ontology & predicate normalizer.
//!
//! The ontology is the controlled vocabulary the extraction prompt is allowed
//! to use. It has two halves:
//!
//! * a language-independent **skeleton**: for every category, the entity that
//!   owns it and the canonical predicates it accepts;
//! * an **alias map** that folds the free-form predicates a small model tends
//!   to invent (`"si_chiama"`, `"colore_preferito"`, …) onto canonical ones.
//!
//! Labels are merged in per language by [`Ontology::categories_for`].
//!
//! ```rust
//! use clam_knowledge::ontology::normalize_predicate;
//!
//! assert_eq!(normalize_predicate("  Si_Chiama "), "ha_nome");
//! assert_eq!(normalize_predicate("ha_nome"), "ha_nome");
//! assert_eq!(normalize_predicate("gioca_a"), "gioca_a");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use clam_types::{AGENT_ENTITY, Assertion, USER_ENTITY};

use crate::locales::Localizer;

/// Key of the catch-all category.
pub const FALLBACK_CATEGORY: &str = "esperienze_utente";

/// How a category is laid out in the knowledge document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStyle {
    /// `  Label: object`, one line per predicate.
    KeyValue,
    /// `  - prefix object`, one line per assertion.
    Bulleted,
}

/// Structural definition of a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDef {
    pub key: String,
    pub entity: String,
    pub predicates: Vec<String>,
    pub style: RenderStyle,
}

/// A category with its localized labels merged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub key: String,
    pub entity: String,
    pub predicates: Vec<String>,
    pub style: RenderStyle,
    pub label: String,
    pub render_labels: HashMap<String, String>,
}

impl Category {
    /// `true` if the subject is this category's entity (ignoring case) and the
    /// predicate is one of its canonical predicates.
    pub fn accepts(&self, assertion: &Assertion) -> bool {
        assertion.subject.trim().to_lowercase() == self.entity.to_lowercase()
            && self.predicates.iter().any(|p| *p == assertion.predicate)
    }
}

/// Category skeleton plus alias map.
#[derive(Debug, Clone)]
pub struct Ontology {
    categories: Vec<CategoryDef>,
    aliases: HashMap<String, String>,
    fallback: String,
}

static STANDARD: LazyLock<Ontology> = LazyLock::new(Ontology::standard);

fn def(key: &str, entity: &str, predicates: &[&str], style: RenderStyle) -> CategoryDef {
    CategoryDef {
        key: key.into(),
        entity: entity.into(),
        predicates: predicates.iter().map(|p| p.to_string()).collect(),
        style,
    }
}

impl Ontology {
    /// Build an ontology from explicit parts. `fallback` must be the key of
    /// one of `categories`.
    pub fn new(categories: Vec<CategoryDef>, aliases: HashMap<String, String>, fallback: impl Into<String>) -> Self {
        Self {
            categories,
            aliases,
            fallback: fallback.into(),
        }
    }

    /// The four categories used by the agent: user identity, user
    /// preferences, user experiences (fallback) and agent identity.
    pub fn standard() -> Self {
        let categories = vec![
            def(
                "identita_utente",
                USER_ENTITY,
                &["ha_nome", "ha_eta", "ha_lavoro", "vive_a", "nazionalita"],
                RenderStyle::KeyValue,
            ),
            def(
                "preferenze_utente",
                USER_ENTITY,
                &[
                    "preferisce_colore",
                    "preferisce_animale",
                    "preferisce_cibo",
                    "preferisce_musica",
                    "preferisce_film",
                    "hobby",
                ],
                RenderStyle::KeyValue,
            ),
            def(
                FALLBACK_CATEGORY,
                USER_ENTITY,
                &["ha_visitato", "ha_conosciuto", "usa_tecnologia", "sa_fare", "fatto_generico"],
                RenderStyle::Bulleted,
            ),
            def(
                "identita_clam",
                AGENT_ENTITY,
                &["è", "ha_eta", "preferisce_animale", "preferisce_colore", "ha_imparato"],
                RenderStyle::KeyValue,
            ),
        ];

        let aliases = [
            ("nome", "ha_nome"),
            ("si_chiama", "ha_nome"),
            ("ha_name", "ha_nome"),
            ("name", "ha_nome"),
            ("eta", "ha_eta"),
            ("età", "ha_eta"),
            ("age", "ha_eta"),
            ("anni", "ha_eta"),
            ("lavoro", "ha_lavoro"),
            ("professione", "ha_lavoro"),
            ("fa_il", "ha_lavoro"),
            ("lavora_come", "ha_lavoro"),
            ("ha_animal_prefere", "preferisce_animale"),
            ("ha_preferenza_animale", "preferisce_animale"),
            ("animale_preferito", "preferisce_animale"),
            ("animal_preferito", "preferisce_animale"),
            ("ama_animale", "preferisce_animale"),
            ("colore_preferito", "preferisce_colore"),
            ("ha_colore_preferito", "preferisce_colore"),
            ("ama_colore", "preferisce_colore"),
            ("cibo_preferito", "preferisce_cibo"),
            ("piatto_preferito", "preferisce_cibo"),
            ("ama_mangiare", "preferisce_cibo"),
            ("è_stato_a", "ha_visitato"),
            ("ha_visto", "ha_visitato"),
            ("conosce", "ha_conosciuto"),
            ("usa", "usa_tecnologia"),
            ("utilizza", "usa_tecnologia"),
            ("è_usato_per", "usa_tecnologia"),
            ("è_tipologia_di", "fatto_generico"),
        ]
        .into_iter()
        .map(|(a, c)| (a.to_string(), c.to_string()))
        .collect();

        Self::new(categories, aliases, FALLBACK_CATEGORY)
    }

    /// Process-wide instance of [`Ontology::standard`].
    pub fn shared() -> &'static Ontology {
        &STANDARD
    }

    /// Map a raw predicate to its canonical form.
    ///
    /// Trims and lower-cases, then looks the result up in the alias map;
    /// unknown predicates pass through in their cleaned form.
    pub fn normalize(&self, raw: &str) -> String {
        let cleaned = raw.trim().to_lowercase();
        match self.aliases.get(&cleaned) {
            Some(canonical) => canonical.clone(),
            None => cleaned,
        }
    }

    pub fn definitions(&self) -> &[CategoryDef] {
        &self.categories
    }

    pub fn fallback_key(&self) -> &str {
        &self.fallback
    }

    /// Categories in declaration order with labels for `lang`. Categories
    /// without localized labels keep an empty label.
    pub fn categories_for(&self, localizer: &dyn Localizer, lang: &str) -> Vec<Category> {
        self.categories
            .iter()
            .map(|d| {
                let labels = localizer.category_labels(&d.key, lang).unwrap_or_default();
                Category {
                    key: d.key.clone(),
                    entity: d.entity.clone(),
                    predicates: d.predicates.clone(),
                    style: d.style,
                    label: labels.label,
                    render_labels: labels.render_labels,
                }
            })
            .collect()
    }

    /// Every canonical predicate, deduplicated in declaration order, joined
    /// with `", "`.
    pub fn allowed_predicates_text(&self) -> String {
        let mut seen = HashSet::new();
        self.categories
            .iter()
            .flat_map(|c| c.predicates.iter())
            .filter(|p| seen.insert(p.as_str()))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// [`Ontology::normalize`] on the shared standard ontology.
pub fn normalize_predicate(raw: &str) -> String {
    Ontology::shared().normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locales::BuiltinLocales;

    #[test]
    fn aliases_map_to_canonical() {
        let o = Ontology::standard();
        assert_eq!(o.normalize("si_chiama"), "ha_nome");
        assert_eq!(o.normalize("ETÀ"), "ha_eta");
        assert_eq!(o.normalize(" Colore_Preferito\n"), "preferisce_colore");
        assert_eq!(o.normalize("è_tipologia_di"), "fatto_generico");
    }

    #[test]
    fn unknown_predicates_pass_through_cleaned() {
        assert_eq!(normalize_predicate("  Gioca_A  "), "gioca_a");
        assert_eq!(normalize_predicate(""), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let o = Ontology::standard();
        let mut inputs: Vec<String> = o.aliases.keys().cloned().collect();
        inputs.extend(o.aliases.values().cloned());
        inputs.extend(o.categories.iter().flat_map(|c| c.predicates.clone()));
        inputs.extend(["  NOME ", "Ha_Visto", "free form", "ÈTÀ", "x_y_z"].map(String::from));
        for raw in inputs {
            let once = o.normalize(&raw);
            assert_eq!(o.normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn canonical_predicates_are_never_aliases() {
        let o = Ontology::standard();
        for def in o.definitions() {
            for p in &def.predicates {
                assert_eq!(&o.normalize(p), p);
            }
        }
    }

    #[test]
    fn allowed_predicates_are_deduplicated_in_order() {
        let text = Ontology::standard().allowed_predicates_text();
        assert_eq!(
            text,
            "ha_nome, ha_eta, ha_lavoro, vive_a, nazionalita, \
             preferisce_colore, preferisce_animale, preferisce_cibo, preferisce_musica, \
             preferisce_film, hobby, ha_visitato, ha_conosciuto, usa_tecnologia, sa_fare, \
             fatto_generico, è, ha_imparato"
        );
    }

    #[test]
    fn categories_merge_localized_labels() {
        let cats = Ontology::standard().categories_for(&BuiltinLocales, "it");
        let keys: Vec<_> = cats.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["identita_utente", "preferenze_utente", "esperienze_utente", "identita_clam"]
        );
        assert_eq!(cats[0].label, "📋 PROFILO DELL'UTENTE");
        assert_eq!(cats[3].entity, "CLAM");
        assert_eq!(cats[2].style, RenderStyle::Bulleted);

        let fallback = Ontology::standard().categories_for(&BuiltinLocales, "zz");
        assert_eq!(fallback[0].label, "📋 USER PROFILE");
    }

    #[test]
    fn category_accepts_entity_case_insensitively() {
        let cats = Ontology::standard().categories_for(&BuiltinLocales, "en");
        let profile = &cats[0];
        assert!(profile.accepts(&Assertion::new("utente", "ha_nome", "Ada", 5)));
        assert!(profile.accepts(&Assertion::new(" UTENTE ", "vive_a", "Pisa", 5)));
        assert!(!profile.accepts(&Assertion::new("Utente", "hobby", "vela", 5)));
        assert!(!profile.accepts(&Assertion::new("CLAM", "ha_nome", "Ada", 5)));
    }
}
