//! Ingestion coordination.
//!
//! The coordinator owns the write path into the content store: chunk,
//! embed, and transactionally replace. Writes are serialized per source key
//! through a lock map, run under a bounded worker pool across keys, and a
//! process-wide flag keeps crawl cycles mutually exclusive.
//!
//! Every intake channel converges here. The crawler feeds
//! [`run_crawl_cycle`](IngestCoordinator::run_crawl_cycle); uploaded
//! documents and meeting transcripts feed
//! [`sync_batch`](IngestCoordinator::sync_batch) with their own key prefixes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::chunker::chunk_text;
use crate::config::{ChunkingConfig, CrawlConfig};
use crate::crawler::Crawler;
use crate::differ;
use crate::embedding::EmbeddingGateway;
use crate::errors::EngineError;
use crate::models::Chunk;
use crate::store::ContentStore;

/// One document version headed for the store, channel-agnostic.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub title: String,
    pub text: String,
    pub content_hash: String,
}

/// Counts from one sync pass, for logs, the CLI, and the ingest endpoint.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SyncReport {
    pub new: usize,
    pub changed: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

pub struct IngestCoordinator {
    store: Arc<ContentStore>,
    embedder: Arc<dyn EmbeddingGateway>,
    chunking: ChunkingConfig,
    batch_size: usize,
    workers: usize,
    tombstone_after_failures: u32,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    crawl_active: AtomicBool,
}

/// Clears the crawl-in-flight flag when a cycle ends, however it ends.
struct CrawlGuard<'a>(&'a AtomicBool);

impl Drop for CrawlGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<ContentStore>,
        embedder: Arc<dyn EmbeddingGateway>,
        chunking: ChunkingConfig,
        batch_size: usize,
        crawl: &CrawlConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            batch_size: batch_size.max(1),
            workers: crawl.ingest_workers,
            tombstone_after_failures: crawl.tombstone_after_failures,
            key_locks: Mutex::new(HashMap::new()),
            crawl_active: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn is_crawl_active(&self) -> bool {
        self.crawl_active.load(Ordering::Acquire)
    }

    async fn key_lock(&self, source_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.key_locks.lock().await;
        locks
            .entry(source_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Chunk, embed, and store one document version. Serialized per key:
    /// two callers racing on the same key apply their writes one after the
    /// other, each atomically.
    pub async fn ingest_document(
        &self,
        source_key: &str,
        doc: &SourceDocument,
        now: i64,
    ) -> Result<usize, EngineError> {
        let lock = self.key_lock(source_key).await;
        let _guard = lock.lock().await;

        let windows = chunk_text(&doc.text, &self.chunking);
        let texts: Vec<String> = windows.iter().map(|(_, t)| t.clone()).collect();
        let embeddings = self.embed_with_fallback(&texts).await;

        let mut chunks = Vec::with_capacity(windows.len());
        for ((index, text), embedding) in windows.into_iter().zip(embeddings) {
            let Some(embedding) = embedding else {
                warn!(source_key, chunk_index = index, "skipping chunk, embedding failed");
                continue;
            };
            chunks.push(Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                source_key: source_key.to_string(),
                chunk_index: index as i64,
                text,
                content_hash: doc.content_hash.clone(),
                embedding,
            });
        }

        if chunks.is_empty() && !texts.is_empty() {
            // Total embedding failure. Leave the stored version alone so the
            // next cycle retries this document.
            return Err(EngineError::Embedding(format!(
                "no chunk of '{}' could be embedded",
                source_key
            )));
        }

        let written = chunks.len();
        self.store
            .upsert_document(source_key, &doc.title, &doc.content_hash, &chunks, now)
            .await?;
        Ok(written)
    }

    /// Embed texts in batches. A failing batch falls back to one-by-one so a
    /// single poisoned input costs one chunk, not the whole document.
    async fn embed_with_fallback(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            match self.embedder.embed_batch(batch).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    out.extend(vectors.into_iter().map(Some));
                }
                Ok(_) | Err(_) => {
                    for text in batch {
                        match self.embedder.embed_batch(std::slice::from_ref(text)).await {
                            Ok(mut v) if !v.is_empty() => out.push(Some(v.remove(0))),
                            Ok(_) => out.push(None),
                            Err(e) => {
                                warn!(error = %e, "embedding failed for one chunk");
                                out.push(None);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// Tombstone one key, serialized with any in-flight ingest for it.
    pub async fn tombstone(&self, source_key: &str, now: i64) -> Result<bool, EngineError> {
        let lock = self.key_lock(source_key).await;
        let _guard = lock.lock().await;
        self.store.tombstone(source_key, now).await
    }

    /// One crawl-and-sync cycle over the site. Rejects overlap with another
    /// cycle; `full` bypasses diffing and rebuilds every crawled page.
    pub async fn run_crawl_cycle(
        self: &Arc<Self>,
        crawler: &Arc<Crawler>,
        full: bool,
    ) -> Result<SyncReport, EngineError> {
        if self
            .crawl_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::CrawlInProgress);
        }
        let _guard = CrawlGuard(&self.crawl_active);

        let outcome = crawler.crawl().await?;
        info!(
            pages = outcome.pages.len(),
            failed = outcome.failed.len(),
            "crawl pass finished"
        );

        let docs: HashMap<String, SourceDocument> = outcome
            .pages
            .into_iter()
            .map(|(url, page)| {
                (
                    url,
                    SourceDocument {
                        title: page.title,
                        text: page.text,
                        content_hash: page.content_hash,
                    },
                )
            })
            .collect();

        // Crawled pages live under http(s) keys; other channels are out of
        // this cycle's removal scope.
        let mut report = self
            .apply_diff(Some("http"), docs, &outcome.failed, full)
            .await?;

        // Failure streak bookkeeping for unreachable pages
        let now = chrono::Utc::now().timestamp();
        for url in &outcome.failed {
            if self.store.get_page(url).await?.is_none() {
                continue;
            }
            let streak = self.store.record_fetch_failure(url).await?;
            if self.tombstone_after_failures > 0 && streak >= self.tombstone_after_failures as i64 {
                info!(url = %url, streak, "tombstoning after repeated fetch failures");
                if self.tombstone(url, now).await? {
                    report.removed += 1;
                }
            }
        }
        report.failed += outcome.failed.len();

        Ok(report)
    }

    /// Sync a complete batch for one intake channel, identified by its key
    /// prefix. Keys under the prefix missing from `docs` are tombstoned,
    /// unless listed in `failed` (unreadable this pass, retried next time).
    pub async fn sync_batch(
        self: &Arc<Self>,
        prefix: &str,
        docs: HashMap<String, SourceDocument>,
        failed: &std::collections::HashSet<String>,
    ) -> Result<SyncReport, EngineError> {
        let mut report = self.apply_diff(Some(prefix), docs, failed, false).await?;
        report.failed += failed.len();
        Ok(report)
    }

    async fn apply_diff(
        self: &Arc<Self>,
        prefix: Option<&str>,
        docs: HashMap<String, SourceDocument>,
        failed: &std::collections::HashSet<String>,
        full: bool,
    ) -> Result<SyncReport, EngineError> {
        let stored = self.store.snapshot_hashes(prefix).await?;
        let fetched: HashMap<String, String> = docs
            .iter()
            .map(|(k, d)| (k.clone(), d.content_hash.clone()))
            .collect();
        let diff = differ::diff(&stored, &fetched, failed, full);
        let now = chrono::Utc::now().timestamp();

        let mut report = SyncReport {
            new: diff.new.len(),
            changed: diff.changed.len(),
            removed: 0,
            unchanged: diff.unchanged.len(),
            failed: 0,
            chunks_written: 0,
        };

        // Removals go first, so a full-mode rebuild never tombstones a page
        // it is about to re-ingest. Keys in both sets are still live: they
        // only appear in `removed` because full mode marks the whole store.
        let ingesting: std::collections::HashSet<&String> =
            diff.new.iter().chain(diff.changed.iter()).collect();
        for key in &diff.removed {
            if ingesting.contains(key) {
                continue;
            }
            if self.tombstone(key, now).await? {
                report.removed += 1;
            }
        }

        // New and changed documents go through the worker pool
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut docs = docs;

        for key in diff.new.iter().chain(diff.changed.iter()) {
            let Some(doc) = docs.remove(key) else { continue };
            let coordinator = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let key = key.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = coordinator.ingest_document(&key, &doc, now).await;
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((key, result)) = joined else { continue };
            match result {
                Ok(written) => report.chunks_written += written,
                Err(e) => {
                    warn!(source_key = %key, error = %e, "ingest failed");
                    report.failed += 1;
                }
            }
        }

        for key in &diff.unchanged {
            self.store.mark_seen(key, now).await?;
        }

        info!(
            new = report.new,
            changed = report.changed,
            removed = report.removed,
            unchanged = report.unchanged,
            failed = report.failed,
            chunks = report.chunks_written,
            "sync pass applied"
        );
        Ok(report)
    }
}
