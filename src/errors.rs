//! Engine error taxonomy.
//!
//! Transient external failures (fetch, embedding, generation) are retried or
//! degraded locally and never take the process down. Consistency violations
//! inside the content store are surfaced, not repaired.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A page or sitemap fetch failed after its bounded retries. The document
    /// is skipped for this cycle and retried on the next one.
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Embedding a chunk failed. Callers skip the chunk and continue with the
    /// rest of the document.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generation backend failed. Surfaced to the caller as a degraded
    /// answer with confidence forced to zero.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Input was rejected by safety filtering. Not retried.
    #[error("message rejected by content filter")]
    ContentFilter,

    /// A crawl cycle is already running process-wide.
    #[error("a crawl is already in progress")]
    CrawlInProgress,

    /// Meeting processing is already running.
    #[error("meeting processing is already in progress")]
    MeetingRunInProgress,

    /// A chunk's content hash does not match its owning page. Indicates
    /// corruption; ingestion for the key halts pending a forced re-ingest.
    #[error(
        "store consistency violation for '{source_key}': \
         chunk hash {chunk_hash} does not match page hash {page_hash}"
    )]
    StoreConsistency {
        source_key: String,
        chunk_hash: String,
        page_hash: String,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EngineError::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
