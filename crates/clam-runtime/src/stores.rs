//! [`MemoryStores`] – the three store handles, built once and shared.

use std::sync::Arc;

use clam_memory::scratch::ScratchBuffer;
use clam_memory::triples::TripleStore;
use clam_memory::vector::VectorStore;
use clam_types::MemorySnapshot;
use tracing::warn;

/// Shared handles to every memory tier. Cloning is cheap.
#[derive(Clone)]
pub struct MemoryStores {
    pub scratch: Arc<ScratchBuffer>,
    pub vectors: Arc<VectorStore>,
    pub triples: Arc<TripleStore>,
}

impl MemoryStores {
    pub fn new(scratch: ScratchBuffer, vectors: VectorStore, triples: TripleStore) -> Self {
        Self {
            scratch: Arc::new(scratch),
            vectors: Arc::new(vectors),
            triples: Arc::new(triples),
        }
    }

    /// Count every store. A store that fails to answer is logged and
    /// reported as empty.
    pub async fn snapshot(&self) -> MemorySnapshot {
        let scratch_count = self.scratch.len().await.unwrap_or_else(|e| {
            warn!(error = %e, "scratch count failed");
            0
        });
        let semantic_count = self.vectors.semantic_count().await.unwrap_or_else(|e| {
            warn!(error = %e, "semantic count failed");
            0
        });
        let triple_count = self.triples.count().await.unwrap_or_else(|e| {
            warn!(error = %e, "triple count failed");
            0
        });
        MemorySnapshot {
            taken_at: Some(chrono::Utc::now()),
            scratch_count,
            semantic_count,
            triple_count,
        }
    }
}
