//! Query-side retrieval: embed the question and rank stored chunks.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingGateway;
use crate::errors::EngineError;
use crate::models::{RetrievedChunk, SourceRef};
use crate::store::ContentStore;

pub struct Retriever {
    store: Arc<ContentStore>,
    embedder: Arc<dyn EmbeddingGateway>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<ContentStore>,
        embedder: Arc<dyn EmbeddingGateway>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Top-k chunks for a question, closest first. When a topic bias prefix
    /// is given, chunks from matching sources win ties in distance; biasing
    /// never changes which chunks are returned, only their order.
    pub async fn retrieve(
        &self,
        question: &str,
        bias_prefix: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, EngineError> {
        let vectors = self
            .embedder
            .embed_batch(std::slice::from_ref(&question.to_string()))
            .await?;
        let query_vec = vectors
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Embedding("empty embedding response".to_string()))?;

        let mut chunks = self.store.nearest(&query_vec, self.config.top_k).await?;
        if let Some(prefix) = bias_prefix {
            apply_bias(&mut chunks, prefix);
        }
        Ok(chunks)
    }
}

fn apply_bias(chunks: &mut [RetrievedChunk], prefix: &str) {
    // Stable, so the store's freshness/key tie-break order survives within
    // each group.
    chunks.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.source_key
                    .starts_with(prefix)
                    .cmp(&a.source_key.starts_with(prefix))
            })
    });
}

/// Collapse retrieved chunks into one citation per source, preserving rank
/// order of first appearance.
pub fn dedup_sources(chunks: &[RetrievedChunk]) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for chunk in chunks {
        if !sources.iter().any(|s| s.url == chunk.source_key) {
            sources.push(SourceRef {
                url: chunk.source_key.clone(),
                title: chunk.title.clone(),
            });
        }
    }
    sources
}
