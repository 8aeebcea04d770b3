//! [`LlmDriver`] – OpenAI-compatible language-model interface.
//!
//! Communicates with a locally-running model server that exposes an
//! OpenAI-compatible `/v1/chat/completions` endpoint, such as
//! [Ollama](https://ollama.com) (`http://localhost:11434`).
//!
//! The rest of the runtime only sees the [`LanguageModel`] trait, so tests
//! drive every stage with scripted fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use clam_runtime::llm_driver::{Completion, LlmDriver, generate_or_empty};
//!
//! # async fn demo() {
//! let driver = LlmDriver::new("http://localhost:11434", "qwen2.5:3b");
//! let request = Completion::new("You are a terse assistant.", "Say hi.");
//!
//! // Requires a running Ollama instance; an unreachable server yields "".
//! let reply = generate_or_empty(&driver, &request).await;
//! # let _ = reply;
//! # }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion request
// ─────────────────────────────────────────────────────────────────────────────

/// One generation request: system prompt, optional prior turns, the new
/// prompt, and an optional JSON Schema the reply must satisfy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
    /// When set, the model is asked for a strict JSON object of this shape.
    pub json_schema: Option<serde_json::Value>,
}

impl Completion {
    pub fn new(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn with_json_schema(mut self, schema: serde_json::Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    /// Flatten into chat order: system, history, then the new user prompt.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: Role::System,
                content: self.system_prompt.clone(),
            });
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LanguageModel
// ─────────────────────────────────────────────────────────────────────────────

/// An opaque text-completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &Completion) -> Result<String, LlmError>;
}

/// Run `request`, mapping any transport failure to an empty string.
pub async fn generate_or_empty(model: &dyn LanguageModel, request: &Completion) -> String {
    match model.generate(request).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "language model call failed, treating as empty reply");
            String::new()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonSchemaSpec<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
}

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaSpec<'a>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share; requests are independent.
pub struct LlmDriver {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"qwen2.5:3b"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.7,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body<'a>(&'a self, messages: &'a [ChatMessage], request: &'a Completion) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: self.temperature,
            response_format: request.json_schema.as_ref().map(|schema| ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaSpec {
                    name: "response",
                    schema,
                },
            }),
        }
    }
}

#[async_trait]
impl LanguageModel for LlmDriver {
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, or
    /// [`LlmError::BadResponse`] if the response shape is unexpected.
    async fn generate(&self, request: &Completion) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let messages = request.messages();
        let body = self.request_body(&messages, request);
        debug!(model = %self.model, messages = messages.len(), json = request.json_schema.is_some(), "chat completion");

        let response: ChatResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}
