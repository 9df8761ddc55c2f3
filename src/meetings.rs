//! Meeting transcript intake.
//!
//! Transcription runs elsewhere; this module consumes the JSON records it
//! delivers into a drop directory and syncs them under `meeting://` source
//! keys. One record file per meeting, segments concatenated into a single
//! document so chunking can work across speaker turns.
//!
//! Processing runs are mutually exclusive through a running flag, mirroring
//! the crawl cycle's guard.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::MeetingsConfig;
use crate::crawler::hash_text;
use crate::errors::EngineError;
use crate::ingest::{IngestCoordinator, SourceDocument, SyncReport};

pub const KEY_PREFIX: &str = "meeting://";

#[derive(Debug, Deserialize)]
pub struct MeetingSegment {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
}

/// One transcript record as delivered by the transcription pipeline.
#[derive(Debug, Deserialize)]
pub struct MeetingRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    pub segments: Vec<MeetingSegment>,
}

impl MeetingRecord {
    fn source_key(&self) -> String {
        format!("{}{}/transcript", KEY_PREFIX, self.id)
    }

    /// Flatten segments into one document, speaker-prefixed where known.
    fn assemble_text(&self) -> String {
        let mut out = String::new();
        if let Some(date) = &self.date {
            out.push_str(&format!("{} ({})\n\n", self.title, date));
        } else {
            out.push_str(&format!("{}\n\n", self.title));
        }
        for segment in &self.segments {
            match &segment.speaker {
                Some(speaker) => out.push_str(&format!("{}: {}\n", speaker, segment.text)),
                None => {
                    out.push_str(&segment.text);
                    out.push('\n');
                }
            }
        }
        out.trim().to_string()
    }
}

pub struct MeetingIntake {
    running: AtomicBool,
}

/// Clears the running flag when a processing run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for MeetingIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingIntake {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Read every transcript record under the drop directory and sync the
    /// batch. Rejects overlap with another run.
    pub async fn sync(
        &self,
        coordinator: &Arc<IngestCoordinator>,
        config: &MeetingsConfig,
    ) -> Result<SyncReport, EngineError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::MeetingRunInProgress);
        }
        let _guard = RunGuard(&self.running);

        let (docs, failed) = scan(&config.root)?;
        coordinator.sync_batch(KEY_PREFIX, docs, &failed).await
    }
}

fn scan(root: &Path) -> Result<(HashMap<String, SourceDocument>, HashSet<String>), EngineError> {
    let mut docs = HashMap::new();
    let failed = HashSet::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file()
            || entry
                .path()
                .extension()
                .map(|e| !e.eq_ignore_ascii_case("json"))
                .unwrap_or(true)
        {
            continue;
        }

        let record: MeetingRecord = match std::fs::read_to_string(entry.path())
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(r) => r,
            Err(e) => {
                // Malformed records are skipped, not tombstoned: we cannot
                // know which source key they were meant to update.
                warn!(path = %entry.path().display(), error = %e, "bad transcript record");
                continue;
            }
        };

        let text = record.assemble_text();
        docs.insert(
            record.source_key(),
            SourceDocument {
                title: record.title,
                content_hash: hash_text(&text),
                text,
            },
        );
    }

    Ok((docs, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkingConfig, CrawlConfig};
    use crate::embedding::MockEmbedder;
    use crate::store::ContentStore;
    use crate::{db, migrate};

    fn write_record(dir: &Path, name: &str, json: &str) {
        std::fs::write(dir.join(name), json).unwrap();
    }

    #[test]
    fn test_assemble_text_with_speakers() {
        let record: MeetingRecord = serde_json::from_str(
            r#"{
                "id": "2026-06-02-council",
                "title": "Regular Council Meeting",
                "date": "2026-06-02",
                "segments": [
                    {"speaker": "Mayor", "text": "Call to order."},
                    {"text": "Minutes approved."}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(record.source_key(), "meeting://2026-06-02-council/transcript");
        let text = record.assemble_text();
        assert!(text.starts_with("Regular Council Meeting (2026-06-02)"));
        assert!(text.contains("Mayor: Call to order."));
        assert!(text.contains("Minutes approved."));
    }

    #[test]
    fn test_scan_skips_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        write_record(
            dir.path(),
            "good.json",
            r#"{"id": "m1", "title": "M1", "segments": [{"text": "hello"}]}"#,
        );
        write_record(dir.path(), "bad.json", "{not json");
        std::fs::write(dir.path().join("notes.txt"), "not a record").unwrap();

        let (docs, failed) = scan(dir.path()).unwrap();
        assert!(failed.is_empty());
        assert_eq!(docs.len(), 1);
        assert!(docs.contains_key("meeting://m1/transcript"));
    }

    #[tokio::test]
    async fn test_overlapping_runs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records");
        std::fs::create_dir(&records).unwrap();
        write_record(
            &records,
            "m1.json",
            r#"{"id": "m1", "title": "M1", "segments": [{"text": "minutes text"}]}"#,
        );

        let pool = db::connect(&dir.path().join("m.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let coordinator = Arc::new(IngestCoordinator::new(
            Arc::new(ContentStore::new(pool)),
            Arc::new(MockEmbedder::new(16)),
            ChunkingConfig::default(),
            8,
            &CrawlConfig::default(),
        ));
        let config = MeetingsConfig { root: records };
        let intake = MeetingIntake::new();

        // Simulate an in-flight run
        intake.running.store(true, Ordering::Release);
        let err = intake.sync(&coordinator, &config).await.unwrap_err();
        assert!(matches!(err, EngineError::MeetingRunInProgress));
        intake.running.store(false, Ordering::Release);

        let report = intake.sync(&coordinator, &config).await.unwrap();
        assert_eq!(report.new, 1);
    }
}
