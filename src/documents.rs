//! Uploaded-document intake.
//!
//! Scans an upload directory for text, markdown, and PDF files and syncs the
//! result as a batch under `doc://` source keys, so uploads ride the same
//! diff, chunk, and embed path as crawled pages. A file the scan cannot read
//! is reported failed and left out of removal detection.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::crawler::hash_text;
use crate::errors::EngineError;
use crate::ingest::{IngestCoordinator, SourceDocument, SyncReport};

pub const KEY_PREFIX: &str = "doc://";

fn build_globset(patterns: &[String]) -> Result<GlobSet, EngineError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| EngineError::Config(format!("bad glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| EngineError::Config(e.to_string()))
}

fn source_key(relative: &Path) -> String {
    let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}{}", KEY_PREFIX, path)
}

fn read_file(path: &Path) -> Result<String, EngineError> {
    let is_pdf = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    if is_pdf {
        pdf_extract::extract_text(path)
            .map_err(|e| EngineError::fetch(path.display().to_string(), e))
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| EngineError::fetch(path.display().to_string(), e))
    }
}

/// Walk the upload root and load every included file.
pub fn scan(
    config: &DocumentsConfig,
) -> Result<(HashMap<String, SourceDocument>, HashSet<String>), EngineError> {
    let include = build_globset(&config.include_globs)?;
    let exclude = build_globset(&config.exclude_globs)?;

    let mut docs = HashMap::new();
    let mut failed = HashSet::new();

    for entry in WalkDir::new(&config.root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(&config.root) else {
            continue;
        };
        if !include.is_match(relative) || exclude.is_match(relative) {
            continue;
        }

        let key = source_key(relative);
        match read_file(entry.path()) {
            Ok(text) => {
                let text = text.trim().to_string();
                let title = entry
                    .path()
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| key.clone());
                docs.insert(
                    key,
                    SourceDocument {
                        title,
                        content_hash: hash_text(&text),
                        text,
                    },
                );
            }
            Err(e) => {
                warn!(source_key = %key, error = %e, "document unreadable");
                failed.insert(key);
            }
        }
    }

    Ok((docs, failed))
}

/// Scan the upload directory and sync it into the store.
pub async fn sync_documents(
    coordinator: &Arc<IngestCoordinator>,
    config: &DocumentsConfig,
) -> Result<SyncReport, EngineError> {
    let (docs, failed) = scan(config)?;
    coordinator.sync_batch(KEY_PREFIX, docs, &failed).await
}
