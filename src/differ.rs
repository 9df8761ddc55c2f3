//! Crawl snapshot differ.
//!
//! Compares the store's source-key → content-hash mapping against a freshly
//! fetched one and produces the disjoint `new` / `changed` / `removed` sets
//! driving incremental ingestion. Keys whose fetch failed this cycle are
//! neither new, changed, nor removed: they are skipped and retried next
//! cycle so a transient source outage never triggers mass deletion.

use std::collections::{HashMap, HashSet};

/// The three disjoint sets produced by a diff, plus the unchanged keys that
/// only need their last-seen timestamp refreshed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CrawlDiff {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Diff the stored snapshot against a fetched one.
///
/// `failed` lists source keys whose fetch failed this cycle; they are
/// excluded from every output set. In `full` mode diffing is bypassed:
/// every stored key is removed and every fetched key is new.
pub fn diff(
    stored: &HashMap<String, String>,
    fetched: &HashMap<String, String>,
    failed: &HashSet<String>,
    full: bool,
) -> CrawlDiff {
    let mut out = CrawlDiff::default();

    if full {
        out.removed = stored.keys().cloned().collect();
        out.new = fetched.keys().cloned().collect();
        out.removed.sort();
        out.new.sort();
        return out;
    }

    for (key, hash) in fetched {
        match stored.get(key) {
            None => out.new.push(key.clone()),
            Some(old) if old != hash => out.changed.push(key.clone()),
            Some(_) => out.unchanged.push(key.clone()),
        }
    }

    for key in stored.keys() {
        if !fetched.contains_key(key) && !failed.contains(key) {
            out.removed.push(key.clone());
        }
    }

    // Deterministic ordering for logs and tests
    out.new.sort();
    out.changed.sort();
    out.removed.sort();
    out.unchanged.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let stored = map(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let fetched = map(&[("b", "2"), ("c", "9"), ("d", "4")]);
        let d = diff(&stored, &fetched, &HashSet::new(), false);

        assert_eq!(d.new, vec!["d"]);
        assert_eq!(d.changed, vec!["c"]);
        assert_eq!(d.removed, vec!["a"]);
        assert_eq!(d.unchanged, vec!["b"]);

        // The four sets partition stored ∪ fetched with no overlap
        let mut all: Vec<&String> = d
            .new
            .iter()
            .chain(&d.changed)
            .chain(&d.removed)
            .chain(&d.unchanged)
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_failed_fetch_is_not_removed() {
        let stored = map(&[("a", "1"), ("b", "2")]);
        // "b" failed to fetch: absent from fetched but must not be removed
        let fetched = map(&[("a", "1")]);
        let failed: HashSet<String> = ["b".to_string()].into();
        let d = diff(&stored, &fetched, &failed, false);

        assert!(d.removed.is_empty());
        assert_eq!(d.unchanged, vec!["a"]);
    }

    #[test]
    fn test_full_mode_removes_and_readds_everything() {
        let stored = map(&[("a", "1"), ("b", "2")]);
        let fetched = map(&[("a", "1"), ("c", "3")]);
        let d = diff(&stored, &fetched, &HashSet::new(), true);

        assert_eq!(d.removed, vec!["a", "b"]);
        assert_eq!(d.new, vec!["a", "c"]);
        assert!(d.changed.is_empty());
        assert!(d.unchanged.is_empty());
    }

    #[test]
    fn test_empty_store_all_new() {
        let fetched = map(&[("a", "1"), ("b", "2")]);
        let d = diff(&HashMap::new(), &fetched, &HashSet::new(), false);
        assert_eq!(d.new, vec!["a", "b"]);
        assert!(d.changed.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn test_incremental_scenario() {
        // Cycle 1 stored {A: h1, B: h2}; cycle 2 fetched {A: h1, C: h3}
        let stored = map(&[("A", "h1"), ("B", "h2")]);
        let fetched = map(&[("A", "h1"), ("C", "h3")]);
        let d = diff(&stored, &fetched, &HashSet::new(), false);

        assert_eq!(d.new, vec!["C"]);
        assert_eq!(d.removed, vec!["B"]);
        assert!(d.changed.is_empty());
        assert_eq!(d.unchanged, vec!["A"]);
    }
}
