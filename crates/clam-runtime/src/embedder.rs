//! [`OllamaEmbedder`] – text embeddings from an Ollama server.
//!
//! Implements [`Embedder`] by calling `POST {base}/api/embeddings` with
//! `{"model": ..., "prompt": ...}` and reading back `{"embedding": [...]}`.

use async_trait::async_trait;
use clam_memory::vector::{Embedder, VectorError};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding client for Ollama's native embeddings endpoint.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embeddings", self.base_url)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let response: EmbeddingResponse = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VectorError::Embedding(e.to_string()))?
            .json()
            .await
            .map_err(|e| VectorError::Embedding(e.to_string()))?;
        Ok(response.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let e = OllamaEmbedder::new("http://localhost:11434/", "nomic-embed-text");
        assert_eq!(e.endpoint(), "http://localhost:11434/api/embeddings");
    }

    #[test]
    fn request_body_shape() {
        let body = serde_json::to_value(EmbeddingRequest {
            model: "nomic-embed-text",
            prompt: "hello",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"model": "nomic-embed-text", "prompt": "hello"}));
    }

    #[test]
    fn response_body_parses() {
        let r: EmbeddingResponse = serde_json::from_str(r#"{"embedding":[0.5,-1.0]}"#).unwrap();
        assert_eq!(r.embedding, vec![0.5, -1.0]);
    }
}
