//! Question-to-chunks retrieval.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::RetrievalError;
use crate::models::{RetrievalConfig, RetrievedChunk};
use crate::services::embedding::Embedder;
use crate::services::vector_index::VectorIndex;

/// Shared slot holding the live index. `None` until the pipeline is ready;
/// rebuilds swap the `Arc` while in-flight searches keep their own clone.
pub type SharedIndex = Arc<RwLock<Option<Arc<VectorIndex>>>>;

/// Composes the embedder and the vector index into question retrieval.
///
/// Applies no re-ranking: results are the index's similarity order, filtered
/// by the configured relevance floor. Deterministic for a fixed index and
/// question.
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: SharedIndex,
    min_score: f32,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<Embedder>, index: SharedIndex, config: &RetrievalConfig) -> Self {
        Self {
            embedder,
            index,
            min_score: config.min_score,
            top_k: config.top_k as usize,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieve the top-k most similar chunks for a question.
    ///
    /// Fails with `RetrievalError::NotReady` when no index is loaded, rather
    /// than returning silently empty results.
    pub async fn retrieve(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let index = {
            let slot = self.index.read().await;
            slot.clone().ok_or(RetrievalError::NotReady)?
        };

        let query_vector = self.embedder.embed_one(question).await?;
        let hits = index.search(&query_vector, k)?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .map(|hit| RetrievedChunk {
                chunk_id: hit.entry.chunk_id,
                text: hit.entry.text,
                source: hit.entry.source,
                score: hit.score,
            })
            .collect())
    }
}
