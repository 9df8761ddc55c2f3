//! Core data types flowing through the sync and answer pipelines.

use serde::Serialize;

/// Lifecycle state of a tracked page. Pages transition active → removed via
/// the differ and stay tombstoned for auditing; they are only purged on a
/// full reset or an explicit purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Active,
    Removed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Active => "active",
            PageStatus::Removed => "removed",
        }
    }

    pub fn parse(s: &str) -> PageStatus {
        match s {
            "removed" => PageStatus::Removed,
            _ => PageStatus::Active,
        }
    }
}

/// One tracked source document: a crawled URL, an uploaded file (`doc://`),
/// or a meeting transcript (`meeting://`). At most one page per source key.
#[derive(Debug, Clone)]
pub struct Page {
    pub source_key: String,
    pub title: String,
    pub content_hash: String,
    /// Unix timestamp of the last cycle that saw this page.
    pub last_seen: i64,
    pub status: PageStatus,
    /// Consecutive failed fetch cycles, reset on success.
    pub fetch_failures: i64,
}

/// An embedded fragment of a document, ready for similarity search.
///
/// Chunks are never mutated in place; the store replaces the whole set for a
/// source key in one transaction.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_key: String,
    pub chunk_index: i64,
    pub text: String,
    /// Hash of the owning document version this chunk was cut from. Must
    /// match the page's current content hash.
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// A chunk returned from retrieval, annotated with its owner and distance.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub source_key: String,
    pub title: String,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine distance to the query embedding, smaller is closer.
    pub distance: f64,
    pub last_seen: i64,
}

/// A deduplicated source citation attached to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
}

/// The full answer payload produced by the pipeline and memoized by the
/// response cache.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// Blended confidence in [0, 1].
    pub confidence: f64,
    pub topic: String,
    pub topic_label: String,
    /// True when the answer should be routed to a human contact channel.
    pub handoff: bool,
}
