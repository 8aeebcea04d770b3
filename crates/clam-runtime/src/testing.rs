//! Scripted fakes for tests of the runtime and of code built on it.
//!
//! Compiled for the crate's own tests and behind the `testing` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clam_memory::scratch::ScratchBuffer;
use clam_memory::triples::TripleStore;
use clam_memory::vector::{Embedder, SqliteIndex, VectorError, VectorStore};

use crate::llm_driver::{Completion, LanguageModel, LlmError};
use crate::stores::MemoryStores;

/// Replays canned replies in order, then answers `""`. `Err` entries simulate
/// transport failures. Every request is recorded.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Completion>>,
}

impl ScriptedModel {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_script(script: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                script
                    .into_iter()
                    .map(|r| r.map(String::from).map_err(String::from))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Completion> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &Completion) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(LlmError::BadResponse(msg)),
            None => Ok(String::new()),
        }
    }
}

/// Letter-frequency vectors: enough to rank overlapping words.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_ascii_lowercase().bytes() {
            if c.is_ascii_lowercase() {
                v[(c - b'a') as usize] += 1.0;
            }
        }
        // Keep the vector non-zero so every document is rankable.
        v.push(1.0);
        Ok(v)
    }
}

/// A [`LetterEmbedder`] whose first `failures` calls fail.
pub struct FlakyEmbedder {
    failures: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing_first(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VectorError::Embedding("embedding server unavailable".into()));
        }
        LetterEmbedder.embed(text).await
    }
}

/// Fresh in-memory stores with the triple store already open.
pub async fn memory_stores() -> MemoryStores {
    memory_stores_with(Arc::new(LetterEmbedder)).await
}

/// Like [`memory_stores`], embedding with `embedder`.
pub async fn memory_stores_with(embedder: Arc<dyn Embedder>) -> MemoryStores {
    let index = SqliteIndex::open_in_memory(embedder).unwrap();
    let vectors = VectorStore::new(Box::new(index), "semantic_memory", "episodic_memory")
        .await
        .unwrap();
    let triples = TripleStore::in_memory();
    triples.open().await.unwrap();
    MemoryStores::new(ScratchBuffer::new().unwrap(), vectors, triples)
}
