//! Ollama probe.
//!
//! Asks `/api/tags` which models are pulled locally so the CLI can warn
//! about a missing chat or embedding model before the first turn.

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// Return the models available on the Ollama server at `base_url`.
pub fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::blocking::get(&url).map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;
    Ok(tags.models)
}

/// `true` if `wanted` is among `models`. A name without a tag matches its
/// `:latest` entry.
pub fn has_model(models: &[OllamaModel], wanted: &str) -> bool {
    models.iter().any(|m| {
        m.name == wanted || (!wanted.contains(':') && m.name.strip_suffix(":latest") == Some(wanted))
    })
}
