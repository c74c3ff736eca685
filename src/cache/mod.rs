//! Content-addressed round cache with cascade invalidation.
//!
//! Every round's cache key folds in the analysis fingerprint and the result
//! hashes of its directly-consumed upstream rounds, so a change anywhere
//! upstream re-runs exactly the rounds it can affect. Entries are plain
//! JSON files written atomically; any unreadable entry is a miss.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analysis::hashing::sha256_hex;
use crate::core::errors::{HandoverError, Result};
use crate::rounds::outputs::RoundOutput;

/// Current cache entry format version. Bump when the entry or round output
/// shapes change incompatibly.
pub const CACHE_VERSION: u32 = 3;

/// Directory name of the cache root under the analyzed repository.
pub const CACHE_ROOT_DIR: &str = ".handover";

/// Render a JSON value with object keys sorted at every level.
///
/// Two semantically equal values always produce the same bytes, which is
/// what makes hashes over serialized round outputs stable.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serializes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => {
                out.push_str(&other.to_string());
            }
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Cache key for a round: analysis fingerprint plus the result hashes of
/// its directly-consumed upstream rounds.
pub fn round_hash(
    round_number: u8,
    model: &str,
    analysis_fingerprint: &str,
    prior_round_hashes: &[String],
) -> String {
    let key = serde_json::json!({
        "roundNumber": round_number,
        "model": model,
        "analysisFingerprint": analysis_fingerprint,
        "priorRoundHashes": prior_round_hashes,
    });
    sha256_hex(canonical_json(&key).as_bytes())
}

/// Hash of a round output, used as a prior-round hash downstream.
pub fn result_hash(output: &RoundOutput) -> String {
    let value = serde_json::to_value(output).unwrap_or(serde_json::Value::Null);
    sha256_hex(canonical_json(&value).as_bytes())
}

/// On-disk record for one cached round.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Entry format version
    pub version: u32,
    /// Round hash the entry was stored under
    pub hash: String,
    /// Round number, 1 through 6
    pub round_number: u8,
    /// Model that produced the result
    pub model: String,
    /// The cached round output
    pub result: RoundOutput,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// Versioned per-round cache under `.handover/cache/rounds/`.
#[derive(Debug)]
pub struct RoundCache {
    repo_root: PathBuf,
    rounds_dir: PathBuf,
    read_enabled: bool,
    migration_needed: AtomicBool,
    gitignore_checked: AtomicBool,
}

impl RoundCache {
    /// Open the cache for a repository. `read_enabled=false` gates lookups
    /// off while writes keep landing on disk for the next run.
    pub fn open(repo_root: &Path, read_enabled: bool) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            rounds_dir: repo_root.join(CACHE_ROOT_DIR).join("cache").join("rounds"),
            read_enabled,
            migration_needed: AtomicBool::new(false),
            gitignore_checked: AtomicBool::new(false),
        }
    }

    /// Directory holding the per-round entry files.
    pub fn rounds_dir(&self) -> &Path {
        &self.rounds_dir
    }

    /// Directory for all cached state, including the analysis cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.repo_root.join(CACHE_ROOT_DIR).join("cache")
    }

    /// One-shot: whether a version migration wiped the cache this run.
    pub fn take_migration_notice(&self) -> bool {
        self.migration_needed.swap(false, Ordering::SeqCst)
    }

    fn entry_path(&self, round_number: u8) -> PathBuf {
        self.rounds_dir.join(format!("round-{round_number}.json"))
    }

    /// Look up a round result by its expected hash.
    ///
    /// Returns `None` on absence, hash mismatch, corruption, or when reads
    /// are gated off. A version mismatch wipes the cache directory once and
    /// records the migration for display.
    pub fn get(&self, round_number: u8, expected_hash: &str) -> Option<RoundOutput> {
        if !self.read_enabled {
            return None;
        }

        let path = self.entry_path(round_number);
        let content = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(err) => {
                debug!("corrupt cache entry {}: {}", path.display(), err);
                return None;
            }
        };

        if entry.version != CACHE_VERSION {
            info!(
                "cache version {} does not match current {}, clearing cache",
                entry.version, CACHE_VERSION
            );
            self.migration_needed.store(true, Ordering::SeqCst);
            if let Err(err) = std::fs::remove_dir_all(self.cache_dir()) {
                warn!("failed to clear outdated cache: {err}");
            }
            return None;
        }

        if entry.hash != expected_hash {
            debug!("cache hash mismatch for round {round_number}");
            return None;
        }

        Some(entry.result)
    }

    /// Store a round result under its hash. Writes are atomic; a crash
    /// mid-write leaves either the old entry or none.
    pub fn set(
        &self,
        round_number: u8,
        hash: &str,
        result: &RoundOutput,
        model: &str,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.rounds_dir).map_err(|e| {
            HandoverError::io(
                format!("Failed to create cache directory: {}", self.rounds_dir.display()),
                e,
            )
        })?;

        let entry = CacheEntry {
            version: CACHE_VERSION,
            hash: hash.to_string(),
            round_number,
            model: model.to_string(),
            result: result.clone(),
            created_at: Utc::now(),
        };

        let path = self.entry_path(round_number);
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(&entry)?;

        std::fs::write(&temp_path, content).map_err(|e| {
            HandoverError::io(format!("Failed to write cache entry: {}", temp_path.display()), e)
        })?;
        std::fs::rename(&temp_path, &path).map_err(|e| {
            HandoverError::io(format!("Failed to rename cache entry: {}", path.display()), e)
        })?;

        if !self.gitignore_checked.swap(true, Ordering::SeqCst) {
            self.ensure_gitignore();
        }

        Ok(())
    }

    /// Make sure the repository's `.gitignore` covers the cache root.
    /// Appends a line when absent; leaves existing content untouched.
    fn ensure_gitignore(&self) {
        let gitignore = self.repo_root.join(".gitignore");
        let existing = std::fs::read_to_string(&gitignore).unwrap_or_default();
        let covered = existing.lines().any(|line| {
            let line = line.trim().trim_end_matches('/');
            line == CACHE_ROOT_DIR
        });
        if covered {
            return;
        }

        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(CACHE_ROOT_DIR);
        updated.push_str("/\n");

        if let Err(err) = std::fs::write(&gitignore, updated) {
            warn!("failed to update .gitignore: {err}");
        } else {
            debug!("added {CACHE_ROOT_DIR}/ to .gitignore");
        }
    }
}
