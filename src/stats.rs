//! Corpus statistics and health overview.
//!
//! A quick summary of what's synced and answerable: page and chunk counts by
//! channel, tombstones, cache fill, and the last sync time. Used by
//! `askbase stats` to give confidence that sync cycles are working.

use anyhow::Result;
use sqlx::Row;

use crate::engine::Engine;

/// Per-channel breakdown of page and chunk counts.
struct ChannelStats {
    channel: &'static str,
    page_count: i64,
    chunk_count: i64,
}

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(engine: &Engine) -> Result<()> {
    let status = engine.status().await?;
    let pool = engine.store.pool();

    let db_size = std::fs::metadata(&engine.config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("askbase — Knowledge Base Stats");
    println!("==============================");
    println!();
    println!("  Database:     {}", engine.config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Active pages: {}", status.active_pages);
    println!("  Tombstoned:   {}", status.removed_pages);
    println!("  Chunks:       {}", status.chunk_count);
    println!("  Cache:        {} entries", status.cache_entries);
    println!(
        "  Last sync:    {}",
        match status.last_sync {
            Some(ts) => format_ts_relative(ts),
            None => "never".to_string(),
        }
    );

    let mut by_channel: Vec<ChannelStats> = Vec::new();
    for (channel, like) in [
        ("web", "http%"),
        ("documents", "doc://%"),
        ("meetings", "meeting://%"),
    ] {
        let row = sqlx::query(
            "SELECT
               (SELECT COUNT(*) FROM pages
                 WHERE status = 'active' AND source_key LIKE ?) AS page_count,
               (SELECT COUNT(*) FROM chunks WHERE source_key LIKE ?) AS chunk_count",
        )
        .bind(like)
        .bind(like)
        .fetch_one(pool)
        .await?;

        by_channel.push(ChannelStats {
            channel,
            page_count: row.get("page_count"),
            chunk_count: row.get("chunk_count"),
        });
    }

    if by_channel.iter().any(|c| c.page_count > 0) {
        println!();
        println!("  By channel:");
        println!("  {:<12} {:>8} {:>8}", "CHANNEL", "PAGES", "CHUNKS");
        println!("  {}", "-".repeat(30));
        for c in &by_channel {
            println!(
                "  {:<12} {:>8} {:>8}",
                c.channel, c.page_count, c.chunk_count
            );
        }
    }

    println!();
    Ok(())
}

/// Human-readable size for the database file.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in ["KB", "MB", "GB"] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

/// Relative wording for recent timestamps; anything older than a month (or
/// in the future, clock skew) prints as ISO.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 0 => format_ts_iso(ts),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86_400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 30 * 86_400 => format!("{} day{} ago", d / 86_400, plural(d / 86_400)),
        _ => format_ts_iso(ts),
    }
}

fn format_ts_iso(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative_buckets() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 10), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }
}
