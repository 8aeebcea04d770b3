//! Configuration Vault – reads/writes `~/.clam/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clam_runtime::{ConsolidationPolicy, SystemConfig};

/// Persisted user configuration stored in `~/.clam/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Language of prompts and of the knowledge document (`en`, `it`).
    #[serde(default = "default_language")]
    pub language: String,

    /// Base URL of the Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Chat model (e.g. "qwen2.5:3b").
    #[serde(default = "default_model")]
    pub active_model: String,

    /// Model used for semantic-memory embeddings.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Where the vector and triple databases live. Empty means
    /// `~/.clam/data`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_dir: String,

    #[serde(default = "default_semantic_collection")]
    pub semantic_collection: String,

    #[serde(default = "default_episodic_collection")]
    pub episodic_collection: String,

    /// Score at which a buffered fact is promoted.
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: i64,

    /// Minutes without reinforcement before a weak fact may be forgotten.
    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: f64,

    #[serde(default = "default_min_score")]
    pub min_score: i64,

    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Off by default: small models contest almost everything.
    #[serde(default)]
    pub critic_enabled: bool,

    #[serde(default)]
    pub internal_debate: bool,

    /// Trusted assertions loaded into an empty knowledge base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_semantic_collection() -> String {
    "semantic_memory".to_string()
}
fn default_episodic_collection() -> String {
    "episodic_memory".to_string()
}
fn default_promotion_threshold() -> i64 {
    3
}
fn default_decay_minutes() -> f64 {
    60.0
}
fn default_min_score() -> i64 {
    1
}
fn default_tick_interval_secs() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: default_language(),
            ollama_url: default_ollama_url(),
            active_model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            data_dir: String::new(),
            semantic_collection: default_semantic_collection(),
            episodic_collection: default_episodic_collection(),
            promotion_threshold: default_promotion_threshold(),
            decay_minutes: default_decay_minutes(),
            min_score: default_min_score(),
            tick_interval_secs: default_tick_interval_secs(),
            critic_enabled: false,
            internal_debate: false,
            seed_file: None,
        }
    }
}

impl Config {
    /// The library configuration, with relative defaults resolved under
    /// `clam_home`.
    pub fn to_system_config(&self, clam_home: &Path) -> SystemConfig {
        let data_dir = if self.data_dir.is_empty() {
            clam_home.join("data")
        } else {
            PathBuf::from(&self.data_dir)
        };
        let seed_file = match &self.seed_file {
            Some(path) => PathBuf::from(path),
            None => clam_home.join("seed_truths.toml"),
        };
        SystemConfig {
            language: self.language.clone(),
            ollama_url: self.ollama_url.clone(),
            model: self.active_model.clone(),
            embedding_model: self.embedding_model.clone(),
            temperature: self.temperature,
            data_dir,
            semantic_collection: self.semantic_collection.clone(),
            episodic_collection: self.episodic_collection.clone(),
            policy: ConsolidationPolicy {
                promotion_threshold: self.promotion_threshold,
                decay_minutes: self.decay_minutes,
                min_score: self.min_score,
            },
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
            critic_enabled: self.critic_enabled,
            internal_debate: self.internal_debate,
            seed_file: Some(seed_file),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// `~/.clam`, home of the config file, the data directory and the default
/// seed file.
pub fn clam_home() -> PathBuf {
    clam_home_for(&home_dir())
}

pub(crate) fn clam_home_for(home: &str) -> PathBuf {
    PathBuf::from(home).join(".clam")
}

/// Return the path to `~/.clam/config.toml`.
pub fn config_path() -> PathBuf {
    clam_home().join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CLAM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CLAM_OLLAMA_URL` | `ollama_url` |
/// | `CLAM_MODEL` | `active_model` |
/// | `CLAM_EMBEDDING_MODEL` | `embedding_model` |
/// | `CLAM_LANGUAGE` | `language` |
/// | `CLAM_DATA_DIR` | `data_dir` |
pub fn apply_env_overrides(cfg: &mut Config) {
    let overrides: [(&str, &mut String); 5] = [
        ("CLAM_OLLAMA_URL", &mut cfg.ollama_url),
        ("CLAM_MODEL", &mut cfg.active_model),
        ("CLAM_EMBEDDING_MODEL", &mut cfg.embedding_model),
        ("CLAM_LANGUAGE", &mut cfg.language),
        ("CLAM_DATA_DIR", &mut cfg.data_dir),
    ];
    for (var, field) in overrides {
        if let Ok(v) = std::env::var(var)
            && !v.trim().is_empty()
        {
            *field = v.trim().to_string();
        }
    }
}

/// Save the config to disk, creating `~/.clam/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Seed truths shipped with the binary.
const BUNDLED_SEED: &str = include_str!("../../../seed_truths.toml");

/// Write the bundled seed file to `path` unless a file is already there.
/// Returns whether it was written.
pub fn install_bundled_seed(path: &Path) -> Result<bool, String> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    fs::write(path, BUNDLED_SEED).map_err(|e| format!("Failed to write seed file at {}: {}", path.display(), e))?;
    Ok(true)
}
