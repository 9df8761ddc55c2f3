use sqlx::SqlitePool;

use crate::errors::EngineError;

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), EngineError> {
    // Pages table: one row per tracked source key, tombstoned on removal
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            source_key TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            content_hash TEXT NOT NULL,
            last_seen INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            fetch_failures INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks table: replaced wholesale per source key, embedding as LE f32 blob
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_key TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(source_key, chunk_index),
            FOREIGN KEY (source_key) REFERENCES pages(source_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_key ON chunks(source_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_last_seen ON pages(last_seen DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
