//! Content store: versioned pages and their embedded chunks in SQLite.
//!
//! All mutations route through this type so the generation counter stays
//! honest. The counter increments on every write that could change retrieval
//! results; the response cache records it per entry and treats a mismatch as
//! an implicit invalidation.
//!
//! Chunk replacement is transactional. A concurrent reader sees either the
//! full previous chunk set for a source key or the full new one, never a mix.

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::errors::EngineError;
use crate::models::{Chunk, Page, PageStatus, RetrievedChunk};

pub struct ContentStore {
    pool: SqlitePool,
    generation: AtomicU64,
}

/// Corpus counts surfaced by `stats` and the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_pages: i64,
    pub removed_pages: i64,
    pub chunk_count: i64,
    pub last_sync: Option<i64>,
}

impl ContentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            generation: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current store generation. Monotonic within the process lifetime.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Map of source key → content hash for all active pages, the stored side
    /// of a crawl diff. An optional key prefix scopes the snapshot to one
    /// intake channel (`doc://`, `meeting://`).
    pub async fn snapshot_hashes(
        &self,
        prefix: Option<&str>,
    ) -> Result<HashMap<String, String>, EngineError> {
        let rows = match prefix {
            Some(p) => {
                sqlx::query(
                    "SELECT source_key, content_hash FROM pages
                     WHERE status = 'active' AND source_key LIKE ? || '%'",
                )
                .bind(p)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT source_key, content_hash FROM pages WHERE status = 'active'")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| (row.get("source_key"), row.get("content_hash")))
            .collect())
    }

    pub async fn get_page(&self, source_key: &str) -> Result<Option<Page>, EngineError> {
        let row = sqlx::query(
            "SELECT source_key, title, content_hash, last_seen, status, fetch_failures
             FROM pages WHERE source_key = ?",
        )
        .bind(source_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Page {
            source_key: r.get("source_key"),
            title: r.get("title"),
            content_hash: r.get("content_hash"),
            last_seen: r.get("last_seen"),
            status: PageStatus::parse(r.get::<String, _>("status").as_str()),
            fetch_failures: r.get("fetch_failures"),
        }))
    }

    /// Write a document version: upsert the page row and replace its chunk
    /// set, all in one transaction. Re-activates a tombstoned page and resets
    /// its failure counter.
    pub async fn upsert_document(
        &self,
        source_key: &str,
        title: &str,
        content_hash: &str,
        chunks: &[Chunk],
        now: i64,
    ) -> Result<(), EngineError> {
        // A chunk carrying a different version's hash means the caller mixed
        // document versions; refuse the whole write for this key.
        for chunk in chunks {
            if chunk.content_hash != content_hash {
                return Err(EngineError::StoreConsistency {
                    source_key: source_key.to_string(),
                    chunk_hash: chunk.content_hash.clone(),
                    page_hash: content_hash.to_string(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO pages (source_key, title, content_hash, last_seen, status, fetch_failures)
             VALUES (?, ?, ?, ?, 'active', 0)
             ON CONFLICT(source_key) DO UPDATE SET
               title = excluded.title,
               content_hash = excluded.content_hash,
               last_seen = excluded.last_seen,
               status = 'active',
               fetch_failures = 0",
        )
        .bind(source_key)
        .bind(title)
        .bind(content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE source_key = ?")
            .bind(source_key)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, source_key, chunk_index, text, content_hash, embedding)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(source_key)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(content_hash)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.bump_generation();
        Ok(())
    }

    /// Tombstone a page and drop its chunks. The page row survives for
    /// auditing and failure tracking. No-op generation-wise if the page was
    /// already removed.
    pub async fn tombstone(&self, source_key: &str, now: i64) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE pages SET status = 'removed', last_seen = ?
             WHERE source_key = ? AND status = 'active'",
        )
        .bind(now)
        .bind(source_key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM chunks WHERE source_key = ?")
            .bind(source_key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.bump_generation();
        Ok(true)
    }

    /// Refresh `last_seen` for an unchanged page and clear its failure streak.
    /// Does not touch the generation counter: nothing retrievable changed.
    pub async fn mark_seen(&self, source_key: &str, now: i64) -> Result<(), EngineError> {
        sqlx::query("UPDATE pages SET last_seen = ?, fetch_failures = 0 WHERE source_key = ?")
            .bind(now)
            .bind(source_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump the consecutive-failure counter for a page and return the new
    /// streak length.
    pub async fn record_fetch_failure(&self, source_key: &str) -> Result<i64, EngineError> {
        sqlx::query("UPDATE pages SET fetch_failures = fetch_failures + 1 WHERE source_key = ?")
            .bind(source_key)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query("SELECT fetch_failures FROM pages WHERE source_key = ?")
            .bind(source_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("fetch_failures")).unwrap_or(0))
    }

    /// Top-k nearest chunks to the query vector across all active pages.
    ///
    /// Distances are exact cosine over a full scan, which is fine at the
    /// corpus sizes this engine targets (thousands of chunks). Ordering is
    /// deterministic: distance asc, then page freshness desc, then source key.
    pub async fn nearest(
        &self,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, EngineError> {
        let rows = sqlx::query(
            "SELECT c.source_key, c.chunk_index, c.text, c.content_hash, c.embedding,
                    p.title, p.content_hash AS page_hash, p.last_seen
             FROM chunks c
             JOIN pages p ON p.source_key = c.source_key
             WHERE p.status = 'active'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<RetrievedChunk> = Vec::with_capacity(rows.len());

        for row in &rows {
            let chunk_hash: String = row.get("content_hash");
            let page_hash: String = row.get("page_hash");
            if chunk_hash != page_hash {
                // Corrupt rows degrade that one source, not every query.
                // The next successful ingest of the key replaces them.
                tracing::warn!(
                    source_key = %row.get::<String, _>("source_key"),
                    "chunk hash does not match its page, skipping"
                );
                continue;
            }

            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);

            results.push(RetrievedChunk {
                source_key: row.get("source_key"),
                title: row.get("title"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                distance: cosine_distance(query_vec, &embedding),
                last_seen: row.get("last_seen"),
            });
        }

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.source_key.cmp(&b.source_key))
        });
        results.truncate(top_k);

        Ok(results)
    }

    pub async fn stats(&self) -> Result<StoreStats, EngineError> {
        let row = sqlx::query(
            "SELECT
               (SELECT COUNT(*) FROM pages WHERE status = 'active') AS active_pages,
               (SELECT COUNT(*) FROM pages WHERE status = 'removed') AS removed_pages,
               (SELECT COUNT(*) FROM chunks) AS chunk_count,
               (SELECT MAX(last_seen) FROM pages) AS last_sync",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            active_pages: row.get("active_pages"),
            removed_pages: row.get("removed_pages"),
            chunk_count: row.get("chunk_count"),
            last_sync: row.get("last_sync"),
        })
    }

    /// Delete tombstoned page rows outright. Memory reclamation, not part of
    /// the normal sync cycle.
    pub async fn purge_removed(&self) -> Result<u64, EngineError> {
        let deleted = sqlx::query("DELETE FROM pages WHERE status = 'removed'")
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn test_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("store.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, ContentStore::new(pool))
    }

    fn make_chunk(source_key: &str, index: i64, text: &str, embedding: Vec<f32>) -> Chunk {
        chunk_with_hash(source_key, index, text, embedding, "h1")
    }

    fn chunk_with_hash(
        source_key: &str,
        index: i64,
        text: &str,
        embedding: Vec<f32>,
        hash: &str,
    ) -> Chunk {
        Chunk {
            id: uuid::Uuid::new_v4().to_string(),
            source_key: source_key.to_string(),
            chunk_index: index,
            text: text.to_string(),
            content_hash: hash.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_retrieve() {
        let (_dir, store) = test_store().await;

        let chunks = vec![
            make_chunk("https://a.test/x", 0, "near", vec![1.0, 0.0]),
            make_chunk("https://a.test/x", 1, "far", vec![0.0, 1.0]),
        ];
        store
            .upsert_document("https://a.test/x", "Page X", "h1", &chunks, 100)
            .await
            .unwrap();

        let hits = store.nearest(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "near");
        assert!(hits[0].distance < 1e-6);
        assert!(hits[1].distance > 0.5);
    }

    #[tokio::test]
    async fn test_upsert_replaces_chunk_set() {
        let (_dir, store) = test_store().await;
        let key = "https://a.test/x";

        let v1: Vec<Chunk> = (0..3)
            .map(|i| make_chunk(key, i, &format!("old {}", i), vec![1.0, 0.0]))
            .collect();
        store.upsert_document(key, "X", "h1", &v1, 100).await.unwrap();

        let v2 = vec![chunk_with_hash(key, 0, "new", vec![1.0, 0.0], "h2")];
        store.upsert_document(key, "X", "h2", &v2, 200).await.unwrap();

        let hits = store.nearest(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn test_tombstone_hides_chunks_and_keeps_page() {
        let (_dir, store) = test_store().await;
        let key = "https://a.test/gone";

        let chunks = vec![make_chunk(key, 0, "body", vec![1.0, 0.0])];
        store.upsert_document(key, "Gone", "h1", &chunks, 100).await.unwrap();

        assert!(store.tombstone(key, 200).await.unwrap());
        assert!(store.nearest(&[1.0, 0.0], 5).await.unwrap().is_empty());

        let page = store.get_page(key).await.unwrap().unwrap();
        assert_eq!(page.status, PageStatus::Removed);

        // Second tombstone is a no-op
        assert!(!store.tombstone(key, 300).await.unwrap());
    }

    #[tokio::test]
    async fn test_generation_bumps_on_writes_only() {
        let (_dir, store) = test_store().await;
        let key = "https://a.test/x";

        assert_eq!(store.generation(), 0);

        let chunks = vec![make_chunk(key, 0, "t", vec![1.0, 0.0])];
        store.upsert_document(key, "X", "h1", &chunks, 100).await.unwrap();
        assert_eq!(store.generation(), 1);

        store.mark_seen(key, 150).await.unwrap();
        assert_eq!(store.generation(), 1, "mark_seen must not invalidate");

        store.tombstone(key, 200).await.unwrap();
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failures_reset_on_success() {
        let (_dir, store) = test_store().await;
        let key = "https://a.test/flaky";

        let chunks = vec![make_chunk(key, 0, "t", vec![1.0, 0.0])];
        store.upsert_document(key, "F", "h1", &chunks, 100).await.unwrap();

        assert_eq!(store.record_fetch_failure(key).await.unwrap(), 1);
        assert_eq!(store.record_fetch_failure(key).await.unwrap(), 2);

        store.mark_seen(key, 200).await.unwrap();
        let page = store.get_page(key).await.unwrap().unwrap();
        assert_eq!(page.fetch_failures, 0);
    }

    #[tokio::test]
    async fn test_upsert_rejects_mixed_version_chunks() {
        let (_dir, store) = test_store().await;
        let key = "https://a.test/x";

        let chunks = vec![
            chunk_with_hash(key, 0, "current", vec![1.0, 0.0], "h2"),
            chunk_with_hash(key, 1, "stale", vec![0.0, 1.0], "h1"),
        ];
        let err = store
            .upsert_document(key, "X", "h2", &chunks, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StoreConsistency { .. }));

        // Nothing written for the rejected key
        assert_eq!(store.stats().await.unwrap().active_pages, 0);
    }

    #[tokio::test]
    async fn test_nearest_skips_corrupt_key_and_serves_the_rest() {
        let (_dir, store) = test_store().await;

        let good = vec![make_chunk("https://a.test/good", 0, "fine", vec![1.0, 0.0])];
        store
            .upsert_document("https://a.test/good", "Good", "h1", &good, 100)
            .await
            .unwrap();
        let bad = vec![make_chunk("https://a.test/bad", 0, "rot", vec![1.0, 0.0])];
        store
            .upsert_document("https://a.test/bad", "Bad", "h1", &bad, 100)
            .await
            .unwrap();

        // Corrupt one page hash behind the store's back
        sqlx::query("UPDATE pages SET content_hash = 'other' WHERE source_key = ?")
            .bind("https://a.test/bad")
            .execute(store.pool())
            .await
            .unwrap();

        // The corrupt key degrades silently; other sources keep answering
        let hits = store.nearest(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_key, "https://a.test/good");
    }

    #[tokio::test]
    async fn test_snapshot_hashes_scoped_by_prefix() {
        let (_dir, store) = test_store().await;

        store
            .upsert_document("https://a.test/x", "X", "h1", &[], 100)
            .await
            .unwrap();
        store
            .upsert_document("doc://guides/permits.pdf", "Permits", "h2", &[], 100)
            .await
            .unwrap();

        let all = store.snapshot_hashes(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let docs = store.snapshot_hashes(Some("doc://")).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs.contains_key("doc://guides/permits.pdf"));
    }
}
