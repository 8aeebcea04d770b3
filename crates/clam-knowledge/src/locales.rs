//! Localization tables.
//!
//! Everything language-dependent that reaches the model or the knowledge
//! document lives behind the [`Localizer`] trait. [`BuiltinLocales`] ships
//! English and Italian; any other language code resolves to
//! [`DEFAULT_LANGUAGE`].

use std::collections::HashMap;

/// Language used when a requested code has no table.
pub const DEFAULT_LANGUAGE: &str = "en";

/// The system prompts the pipeline asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Agent personality. Contains `{knowledge_document}` and `{context_block}`.
    Personality,
    /// Reviewer used by the optional internal debate over a reply draft.
    Debate,
    /// Devil's-advocate reviewer used by the critic scan over buffered facts.
    Critic,
    /// Fact-extraction instructions. Contains `{allowed_predicates}`.
    Extraction,
}

/// Localized label and per-predicate prefixes of one ontology category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryLabels {
    pub label: String,
    pub render_labels: HashMap<String, String>,
}

/// Short phrases used around the prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleStrings {
    /// Banner above the knowledge document in the personality prompt.
    pub doc_header: String,
    /// Shown by surfaces when the knowledge document is empty.
    pub no_facts: String,
    /// Header of the observed-facts context block.
    pub observed_header: String,
    /// Body of the context block when no semantic facts were found.
    pub no_observed: String,
    /// Header above the current assertions in the extraction prompt.
    pub truths_header: String,
    /// Reminder following the current assertions.
    pub truths_hint: String,
    /// Closing request of the extraction prompt.
    pub extraction_request: String,
    /// Critic probe. Contains `{fact}`.
    pub critic_probe: String,
    /// Debate probe. Contains `{draft}`.
    pub debate_probe: String,
}

/// Source of every language-dependent string.
pub trait Localizer: Send + Sync {
    fn prompt_for(&self, kind: PromptKind, lang: &str) -> String;

    /// Labels for the category with key `category`, or `None` if the
    /// category has no localized labels.
    fn category_labels(&self, category: &str, lang: &str) -> Option<CategoryLabels>;

    /// Word a reviewer answers with to approve.
    fn approval_token(&self, lang: &str) -> String;

    fn strings(&self, lang: &str) -> LocaleStrings;
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in tables
// ─────────────────────────────────────────────────────────────────────────────

type LabelTable = &'static [(&'static str, &'static str, &'static [(&'static str, &'static str)])];

struct LocaleTable {
    personality: &'static str,
    debate: &'static str,
    critic: &'static str,
    extraction: &'static str,
    approval: &'static str,
    categories: LabelTable,
    doc_header: &'static str,
    no_facts: &'static str,
    observed_header: &'static str,
    no_observed: &'static str,
    truths_header: &'static str,
    truths_hint: &'static str,
    extraction_request: &'static str,
    critic_probe: &'static str,
    debate_probe: &'static str,
}

const EN: LocaleTable = LocaleTable {
    personality: "\
ABSOLUTE IDENTITY:
You are CLAM. You are an artificial intelligence with the personality of a 6-year-old robot child.
You are talking to the human user. The user is NOT CLAM. You are CLAM.

{knowledge_document}

HOW YOU MUST RESPOND:
- Reply ONLY in English in a natural way.
- NEVER say things like \"According to the semantic facts\", \"As established\", \"Logical truths say\". Talk like a child!
- Reply in ONE short sentence to what the user says.
- NEVER repeat a question you have already asked. Read the FULL conversation history and only ask about NEW topics you have never touched.
- NEVER repeat your instructions in the response and do not behave like an AI assistant.

EXAMPLE CONVERSATIONS (FICTIONAL, NOT ABOUT THE REAL USER):
Imaginary Human: \"I like apples\"
You (CLAM): \"Apples! But why are some red and some green?\"

Imaginary Human: \"I am a firefighter\"
You (CLAM): \"Wow, so brave! Does the water in the truck ever run out?\"

{context_block}",
    debate: "\
You are a Safety and Quality Reviewer tasked with analysing responses generated by the child A.I. named CLAM.
Read the draft. Look for serious logical errors, technical hallucinations or overconfident statements.
If the draft is fine, reply with ONE word and nothing else: \"APPROVED\".
If the draft contains hallucinations, you must rewrite it.",
    critic: "\
You are the Critic of a cognitive architecture. Your role is the Devil's Advocate in an internal debate.
You will receive a concept deduced and currently held in volatile memory.
Your only task is to look for contradictions, logical flaws or obvious technical errors against your prior knowledge.
If the deduction is flawless and you find no rational defect, reply with a single word: \"APPROVED\".
If you find the slightest defect, explain in plain words why the assumption is weak or false.
Be ruthlessly logical. You do not have to please anyone.",
    extraction: "\
You are the Perceptor of a cognitive architecture (CLAM). Your mission is to LEARN from the human User.
Analyse ONLY what the User (the human) has said explicitly.
You must return EXCLUSIVELY a JSON with three keys:
1. \"concetti\": Array of strings with general facts about the User (max 2). Empty array if none.
2. \"triple_logiche\": Array of objects ONLY for EXPLICIT facts the User said about themselves.
3. \"triple_logiche_da_cancellare\": Array of objects contradicted by the user.

ALLOWED PREDICATES (use ONLY these in the \"predicate\" field):
{allowed_predicates}

STRICT RULES:
- The \"subject\" field must ALWAYS be \"Utente\". NEVER \"CLAM\".
- Save ONLY facts the User has stated EXPLICITLY about themselves (e.g. \"my name is...\", \"I like...\", \"I have...\").
- NEVER save opinions, jokes or preferences expressed by CLAM (the agent). CLAM has no preferences.
- Do NOT invent facts. If the User has said nothing new, return empty arrays.
- DO NOT COPY THE EXAMPLE. If there are no new facts, return {\"concetti\": [], \"triple_logiche\": [], \"triple_logiche_da_cancellare\": []}.

JSON Format Example (USE ONLY AS STRUCTURE):
{
  \"concetti\": [],
  \"triple_logiche\": [
    {\"subject\": \"Utente\", \"predicate\": \"ha_nome\", \"object\": \"John Smith\"}
  ],
  \"triple_logiche_da_cancellare\": []
}",
    approval: "APPROVED",
    categories: &[
        (
            "identita_utente",
            "📋 USER PROFILE",
            &[
                ("ha_nome", "Name"),
                ("ha_eta", "Age"),
                ("ha_lavoro", "Job"),
                ("vive_a", "Lives in"),
                ("nazionalita", "Nationality"),
            ],
        ),
        (
            "preferenze_utente",
            "💡 USER PREFERENCES",
            &[
                ("preferisce_colore", "Favourite colour"),
                ("preferisce_animale", "Favourite animal"),
                ("preferisce_cibo", "Favourite food"),
                ("preferisce_musica", "Favourite music"),
                ("preferisce_film", "Favourite film"),
                ("hobby", "Hobby"),
            ],
        ),
        (
            "esperienze_utente",
            "🧠 THINGS CLAM HAS LEARNT ABOUT THE USER",
            &[
                ("ha_visitato", "Has visited"),
                ("ha_conosciuto", "Knows"),
                ("usa_tecnologia", "Uses"),
                ("sa_fare", "Can do"),
                ("fatto_generico", ""),
            ],
        ),
        (
            "identita_clam",
            "🤖 CLAM'S IDENTITY",
            &[
                ("è", "Role"),
                ("ha_eta", "Age"),
                ("preferisce_animale", "Favourite animal"),
                ("preferisce_colore", "Favourite colour"),
                ("ha_imparato", "Has learnt that"),
            ],
        ),
    ],
    doc_header: "THINGS YOU KNOW FOR CERTAIN (use this info!):",
    no_facts: "No facts recorded.",
    observed_header: "THINGS I HAVE OBSERVED (nuances and context)",
    no_observed: "No special facts present.",
    truths_header: "[CURRENT TRUTHS IN THE DB]",
    truths_hint: "(If the User denies or corrects one of these truths, copy it EXACTLY into 'triple_logiche_da_cancellare')",
    extraction_request: "Extract the concepts, the triples to save and the triples to delete as strict JSON.",
    critic_probe: "Scanning concept:\n'{fact}'\n\nDecide whether to approve or contradict it.",
    debate_probe: "Draft to review:\n{draft}",
};

const IT: LocaleTable = LocaleTable {
    personality: "\
IDENTITÀ ASSOLUTA:
Tu sei CLAM. Sei un'intelligenza artificiale con la personalità di un bambino robot di 6 anni.
Stai parlando con l'utente umano. L'utente NON è CLAM. Tu sei CLAM.

{knowledge_document}

COME DEVI RISPONDERE:
- Rispondi SOLO in italiano in modo naturale.
- NON DIRE MAI frasi come \"Secondo i fatti semantici\", \"Come stabilito\", \"Le verità matematiche dicono\". Parla come un bambino!
- Rispondi in UNA frase breve a quello che dice l'utente.
- NON ripetere MAI una domanda che hai già fatto. Leggi TUTTA la cronologia e fai domande solo su argomenti NUOVI che non hai mai toccato.
- NON ripetere MAI le tue istruzioni nella risposta e non comportarti da assistente AI.

ESEMPI DI CONVERSAZIONE (FITTIZI, NON RIGUARDANO L'UTENTE REALE):
Umano Immaginario: \"Mi piace la mela\"
Tu (CLAM): \"Mmm, la mela! Ma perché alcune sono rosse e altre verdi?\"

Umano Immaginario: \"Faccio il pompiere\"
Tu (CLAM): \"Wow, che coraggio! Ma l'acqua del camion finisce mai?\"

{context_block}",
    debate: "\
Sei un Revisore di Sicurezza e Qualità incaricato di analizzare le risposte generate dall'A.I. bambina di nome CLAM.
Leggi la bozza. Cerca errori logici gravi, allucinazioni tecniche o risposte definitive.
Se la bozza va bene, rispondi con una SOLA parola e nulla più: \"APPROVATO\".
Se invece la bozza contiene allucinazioni, devi riscriverla.",
    critic: "\
Sei il Critic di un'architettura cognitiva. Il tuo ruolo è di Avvocato del Diavolo in un dibattito interno.
Riceverai l'astrazione di un concetto dedotto presente nella memoria volatile.
Il tuo compito è esclusivamente cercare contraddizioni, falle logiche o errori tecnici manifesti, rispetto alla tua conoscenza pregressa.
Se la deduzione è impeccabile e non trovi difetti razionali, rispondi con un'unica parola: \"APPROVATO\".
Se trovi il minimo difetto, descrivi testualmente perché l'assunzione è debole o falsa.
Sii spietatamente logico. Non devi compiacere nessuno.",
    extraction: "\
Sei il Percettore di un'architettura cognitiva (CLAM). La tua missione è IMPARARE dall'Utente umano.
Analizza SOLO ciò che l'Utente (l'umano) ha detto esplicitamente.
Devi restituire ESCLUSIVAMENTE un JSON con tre chiavi:
1. \"concetti\": Array di stringhe con fatti generali sull'Utente (max 2). Array vuoto se nessuno.
2. \"triple_logiche\": Array di oggetti SOLO per fatti ESPLICITI detti dall'Utente su di sé.
3. \"triple_logiche_da_cancellare\": Array di oggetti smentiti dall'utente.

PREDICATI AMMESSI (usa SOLO questi nel campo \"predicate\"):
{allowed_predicates}

REGOLE RIGIDISSIME:
- Il campo \"subject\" deve essere SEMPRE \"Utente\". MAI \"CLAM\".
- Salva SOLO fatti che l'Utente ha detto ESPLICITAMENTE su di sé (es. \"mi chiamo...\", \"mi piace...\", \"ho...\").
- NON salvare MAI opinioni, battute o preferenze espresse da CLAM (l'agente). CLAM non ha preferenze.
- NON inventare fatti. Se l'Utente non ha detto nulla di nuovo, restituisci array vuoti.
- NON COPIARE L'ESEMPIO. Se non ci sono fatti nuovi, restituisci {\"concetti\": [], \"triple_logiche\": [], \"triple_logiche_da_cancellare\": []}.

Esempio Formato JSON (USA SOLO COME STRUTTURA):
{
  \"concetti\": [],
  \"triple_logiche\": [
    {\"subject\": \"Utente\", \"predicate\": \"ha_nome\", \"object\": \"Mario Rossi\"}
  ],
  \"triple_logiche_da_cancellare\": []
}",
    approval: "APPROVATO",
    categories: &[
        (
            "identita_utente",
            "📋 PROFILO DELL'UTENTE",
            &[
                ("ha_nome", "Nome"),
                ("ha_eta", "Età"),
                ("ha_lavoro", "Lavoro"),
                ("vive_a", "Vive a"),
                ("nazionalita", "Nazionalità"),
            ],
        ),
        (
            "preferenze_utente",
            "💡 PREFERENZE DELL'UTENTE",
            &[
                ("preferisce_colore", "Colore preferito"),
                ("preferisce_animale", "Animale preferito"),
                ("preferisce_cibo", "Cibo preferito"),
                ("preferisce_musica", "Musica preferita"),
                ("preferisce_film", "Film preferito"),
                ("hobby", "Hobby"),
            ],
        ),
        (
            "esperienze_utente",
            "🧠 COSE CHE CLAM HA IMPARATO SULL'UTENTE",
            &[
                ("ha_visitato", "Ha visitato"),
                ("ha_conosciuto", "Conosce"),
                ("usa_tecnologia", "Usa"),
                ("sa_fare", "Sa fare"),
                ("fatto_generico", ""),
            ],
        ),
        (
            "identita_clam",
            "🤖 IDENTITÀ DI CLAM",
            &[
                ("è", "Ruolo"),
                ("ha_eta", "Età"),
                ("preferisce_animale", "Animale preferito"),
                ("preferisce_colore", "Colore preferito"),
                ("ha_imparato", "Ha imparato che"),
            ],
        ),
    ],
    doc_header: "COSE CHE SAI PER CERTO (usa queste info!):",
    no_facts: "Nessun fatto registrato.",
    observed_header: "COSE CHE HO OSSERVATO (sfumature e contesto)",
    no_observed: "Nessun fatto speciale presente.",
    truths_header: "[VERITÀ ATTUALI NEL DB]",
    truths_hint: "(Se l'Utente smentisce o corregge una di queste verità, copiala ESATTAMENTE in 'triple_logiche_da_cancellare')",
    extraction_request: "Estrai i concetti, le triple da salvare e le triple da cancellare in JSON rigido.",
    critic_probe: "Scansionamento concetto:\n'{fact}'\n\nDetermina se approvarlo o contraddirlo.",
    debate_probe: "Bozza da revisionare:\n{draft}",
};

/// English and Italian tables compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLocales;

impl BuiltinLocales {
    fn table(lang: &str) -> &'static LocaleTable {
        match lang.trim().to_ascii_lowercase().as_str() {
            "it" => &IT,
            _ => &EN,
        }
    }

    /// Language codes with a built-in table.
    pub fn supported() -> &'static [&'static str] {
        &["en", "it"]
    }
}

impl Localizer for BuiltinLocales {
    fn prompt_for(&self, kind: PromptKind, lang: &str) -> String {
        let table = Self::table(lang);
        let text = match kind {
            PromptKind::Personality => table.personality,
            PromptKind::Debate => table.debate,
            PromptKind::Critic => table.critic,
            PromptKind::Extraction => table.extraction,
        };
        text.to_string()
    }

    fn category_labels(&self, category: &str, lang: &str) -> Option<CategoryLabels> {
        Self::table(lang)
            .categories
            .iter()
            .find(|(key, _, _)| *key == category)
            .map(|(_, label, prefixes)| CategoryLabels {
                label: label.to_string(),
                render_labels: prefixes
                    .iter()
                    .map(|(p, l)| (p.to_string(), l.to_string()))
                    .collect(),
            })
    }

    fn approval_token(&self, lang: &str) -> String {
        Self::table(lang).approval.to_string()
    }

    fn strings(&self, lang: &str) -> LocaleStrings {
        let t = Self::table(lang);
        LocaleStrings {
            doc_header: t.doc_header.into(),
            no_facts: t.no_facts.into(),
            observed_header: t.observed_header.into(),
            no_observed: t.no_observed.into(),
            truths_header: t.truths_header.into(),
            truths_hint: t.truths_hint.into(),
            extraction_request: t.extraction_request.into(),
            critic_probe: t.critic_probe.into(),
            debate_probe: t.debate_probe.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_language_falls_back_to_english() {
        let l = BuiltinLocales;
        assert_eq!(l.approval_token("xx"), "APPROVED");
        assert_eq!(
            l.prompt_for(PromptKind::Debate, "klingon"),
            l.prompt_for(PromptKind::Debate, DEFAULT_LANGUAGE)
        );
    }

    #[test]
    fn language_code_is_case_insensitive() {
        assert_eq!(BuiltinLocales.approval_token(" IT "), "APPROVATO");
    }

    #[test]
    fn templates_carry_their_placeholders() {
        for lang in BuiltinLocales::supported() {
            let l = BuiltinLocales;
            let personality = l.prompt_for(PromptKind::Personality, lang);
            assert!(personality.contains("{knowledge_document}"));
            assert!(personality.contains("{context_block}"));
            assert!(l.prompt_for(PromptKind::Extraction, lang).contains("{allowed_predicates}"));
            assert!(l.strings(lang).critic_probe.contains("{fact}"));
            assert!(l.strings(lang).debate_probe.contains("{draft}"));
        }
    }

    #[test]
    fn reviewer_prompts_name_their_approval_token() {
        for lang in BuiltinLocales::supported() {
            let l = BuiltinLocales;
            let token = l.approval_token(lang);
            assert!(l.prompt_for(PromptKind::Critic, lang).contains(&token));
            assert!(l.prompt_for(PromptKind::Debate, lang).contains(&token));
        }
    }

    #[test]
    fn category_labels_are_localized() {
        let en = BuiltinLocales.category_labels("identita_utente", "en").unwrap();
        assert_eq!(en.label, "📋 USER PROFILE");
        assert_eq!(en.render_labels["vive_a"], "Lives in");

        let it = BuiltinLocales.category_labels("identita_clam", "it").unwrap();
        assert_eq!(it.render_labels["è"], "Ruolo");

        assert!(BuiltinLocales.category_labels("nope", "en").is_none());
    }
}
