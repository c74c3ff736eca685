//! Content hashing for incremental analysis.
//!
//! Per-file SHA-256 hashes feed two places: the changed-file computation in
//! the incremental cache and the analysis fingerprint that keys every round
//! cache entry. Both hash file content, never size or timestamps.

use std::collections::BTreeMap;
use std::path::Path;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Mapping from repository-relative path to content hash, ordered by path.
pub type FileHashes = BTreeMap<String, String>;

/// Hash a byte slice to a lowercase hex SHA-256 string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash the content of every listed file in parallel.
///
/// Unreadable files hash to the empty string so one bad file never aborts a
/// run; the miss is logged at debug level only.
pub fn hash_files(root: &Path, paths: &[String]) -> FileHashes {
    paths
        .par_iter()
        .map(|rel| {
            let hash = match std::fs::read(root.join(rel)) {
                Ok(bytes) => sha256_hex(&bytes),
                Err(err) => {
                    debug!("failed to read {} for hashing: {}", rel, err);
                    String::new()
                }
            };
            (rel.clone(), hash)
        })
        .collect()
}

/// Compute the analysis fingerprint over a set of per-file hashes.
///
/// The fingerprint is the SHA-256 of newline-joined `path:hash` lines in
/// path order. Sorting makes it independent of discovery order, and hashing
/// content makes it sensitive to any byte change, including same-length
/// edits.
pub fn analysis_fingerprint(hashes: &FileHashes) -> String {
    let listing = hashes
        .iter()
        .map(|(path, hash)| format!("{path}:{hash}"))
        .collect::<Vec<_>>()
        .join("\n");
    sha256_hex(listing.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_order_independent() {
        let mut a = FileHashes::new();
        a.insert("src/lib.rs".to_string(), "aaa".to_string());
        a.insert("src/main.rs".to_string(), "bbb".to_string());

        let mut b = FileHashes::new();
        b.insert("src/main.rs".to_string(), "bbb".to_string());
        b.insert("src/lib.rs".to_string(), "aaa".to_string());

        assert_eq!(analysis_fingerprint(&a), analysis_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let mut a = FileHashes::new();
        a.insert("src/lib.rs".to_string(), sha256_hex(b"let x = true;"));

        let mut b = FileHashes::new();
        // Same byte length, different content.
        b.insert("src/lib.rs".to_string(), sha256_hex(b"let x = truu;"));

        assert_ne!(analysis_fingerprint(&a), analysis_fingerprint(&b));
    }

    #[test]
    fn test_unreadable_file_hashes_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.rs"), "fn main() {}").unwrap();

        let hashes = hash_files(
            dir.path(),
            &["ok.rs".to_string(), "missing.rs".to_string()],
        );
        assert!(!hashes["ok.rs"].is_empty());
        assert!(hashes["missing.rs"].is_empty());
    }
}
