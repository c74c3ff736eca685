//! Persisted per-file hashes for incremental runs.
//!
//! Between runs the engine keeps one JSON file mapping each source path to
//! its content hash. Comparing the persisted map against the current one
//! yields the changed-file set that drives packing priority and the
//! incremental display label.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::hashing::FileHashes;
use crate::core::errors::{HandoverError, Result};

/// File name of the persisted hash map under the cache directory.
const ANALYSIS_CACHE_FILE: &str = "analysis.json";

/// Paths that changed since the previous run, ordered for stable output.
pub type ChangedFileSet = BTreeSet<String>;

/// On-disk shape of the persisted analysis cache.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalysisCacheFile {
    hashes: FileHashes,
}

/// Persisted per-file content hashes from the previous run.
#[derive(Debug)]
pub struct AnalysisCache {
    path: PathBuf,
    previous: FileHashes,
}

impl AnalysisCache {
    /// Load the cache from the given cache directory.
    ///
    /// A missing or unreadable file yields an empty previous map, which is
    /// what a first run looks like.
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(ANALYSIS_CACHE_FILE);
        let previous = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<AnalysisCacheFile>(&content).ok())
            .map(|file| file.hashes)
            .unwrap_or_default();

        if !previous.is_empty() {
            debug!(
                "loaded analysis cache with {} file hashes from {}",
                previous.len(),
                path.display()
            );
        }

        Self { path, previous }
    }

    /// Whether a previous run left any hashes behind.
    pub fn has_previous(&self) -> bool {
        !self.previous.is_empty()
    }

    /// Paths that are new or whose content hash differs from the previous
    /// run.
    ///
    /// On a first run (no previous map) this returns the empty set so the
    /// run is treated as full rather than incremental.
    pub fn changed_files(&self, current: &FileHashes) -> ChangedFileSet {
        if self.previous.is_empty() {
            return ChangedFileSet::new();
        }

        current
            .iter()
            .filter(|(path, hash)| self.previous.get(*path) != Some(*hash))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Whether this run counts as incremental: a previous map exists and
    /// fewer files changed than exist now.
    pub fn is_incremental(&self, current: &FileHashes) -> bool {
        self.has_previous() && self.changed_files(current).len() < current.len()
    }

    /// Atomically persist the current hashes for the next run.
    pub fn save(&self, current: &FileHashes) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HandoverError::io(
                    format!("Failed to create cache directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let file = AnalysisCacheFile {
            hashes: current.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, content).map_err(|e| {
            HandoverError::io(
                format!("Failed to write analysis cache: {}", temp_path.display()),
                e,
            )
        })?;
        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            HandoverError::io(
                format!("Failed to rename analysis cache: {}", self.path.display()),
                e,
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(entries: &[(&str, &str)]) -> FileHashes {
        entries
            .iter()
            .map(|(p, h)| (p.to_string(), h.to_string()))
            .collect()
    }

    #[test]
    fn test_first_run_reports_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnalysisCache::load(dir.path());

        let current = hashes(&[("a.rs", "h1"), ("b.rs", "h2")]);
        assert!(cache.changed_files(&current).is_empty());
        assert!(!cache.is_incremental(&current));
    }

    #[test]
    fn test_changed_and_new_files_detected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnalysisCache::load(dir.path());
        cache
            .save(&hashes(&[("a.rs", "h1"), ("b.rs", "h2")]))
            .unwrap();

        let cache = AnalysisCache::load(dir.path());
        let current = hashes(&[("a.rs", "h1-modified"), ("b.rs", "h2"), ("c.rs", "h3")]);
        let changed = cache.changed_files(&current);

        assert_eq!(
            changed.iter().cloned().collect::<Vec<_>>(),
            vec!["a.rs".to_string(), "c.rs".to_string()]
        );
        assert!(cache.is_incremental(&current));
    }

    #[test]
    fn test_unchanged_run_is_incremental_with_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let current = hashes(&[("a.rs", "h1")]);

        AnalysisCache::load(dir.path()).save(&current).unwrap();
        let cache = AnalysisCache::load(dir.path());

        assert!(cache.changed_files(&current).is_empty());
        assert!(cache.is_incremental(&current));
    }
}
