//! Static-analysis step: repository walk, hashing, and snapshot assembly.
//!
//! This is the light-weight built-in analyzer. It produces the snapshot
//! sections that can be derived from the file system alone; richer sections
//! (AST exports, git history) are filled in by dedicated analyzers when they
//! are wired in, and stay empty otherwise.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::analysis::hashing::{hash_files, FileHashes};
use crate::analysis::snapshot::{
    AnalysisSnapshot, DependencyManifest, DocsSummary, EntryKind, FileEntry, FileTreeSummary,
    SnapshotMetadata, TestingSummary, TodoItem,
};
use crate::core::config::HandoverConfig;
use crate::core::errors::Result;
use crate::packer::ScoredFile;

/// Directories never walked, independent of configuration.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "__pycache__",
    "dist",
    "build",
    "coverage",
    "vendor",
    ".venv",
    "tmp",
];

/// Source file extensions included in the directory tree.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "cpp", "c", "h", "hpp", "cs", "php", "rb",
    "kt", "swift",
];

/// Files larger than this never enter the directory tree.
pub const MAX_TREE_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Manifest file names recognized at any depth.
const MANIFEST_NAMES: &[(&str, &str)] = &[
    ("Cargo.toml", "cargo"),
    ("package.json", "npm"),
    ("pyproject.toml", "pip"),
    ("requirements.txt", "pip"),
    ("go.mod", "go"),
    ("pom.xml", "maven"),
];

/// Everything the static-analysis step hands to the rest of the pipeline.
#[derive(Debug)]
pub struct ScanOutput {
    /// Assembled analysis snapshot
    pub snapshot: AnalysisSnapshot,
    /// Content hash per included source file
    pub hashes: FileHashes,
    /// Files scored for packing, importance descending
    pub scored_files: Vec<ScoredFile>,
}

/// Walk the repository and assemble the analysis snapshot.
pub fn scan_repository(root: &Path, config: &HandoverConfig) -> Result<ScanOutput> {
    let start = Instant::now();
    let include = build_globset(&config.include)?;
    let exclude = build_globset(&config.exclude)?;

    let mut entries = Vec::new();
    let mut oversized = Vec::new();
    let mut manifests = Vec::new();
    let mut doc_files = Vec::new();

    // Depth 0 is the root itself; only descendants get name filtering.
    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        e.depth() == 0
            || !(e.file_type().is_dir()
                && (name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())))
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            crate::core::errors::HandoverError::internal(format!("walk failed: {e}"))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let rel = relative_path(root, path);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some((_, kind)) = MANIFEST_NAMES.iter().find(|(n, _)| *n == file_name) {
            manifests.push(DependencyManifest {
                path: rel.clone(),
                kind: kind.to_string(),
                dependencies: Vec::new(),
            });
        }

        if file_name.to_ascii_lowercase().ends_with(".md") {
            doc_files.push(rel.clone());
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        if let Some(include) = &include {
            if !include.is_match(&rel) {
                continue;
            }
        }
        if let Some(exclude) = &exclude {
            if exclude.is_match(&rel) {
                continue;
            }
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_TREE_FILE_BYTES {
            debug!("excluding oversized file from tree: {} ({} bytes)", rel, size);
            oversized.push((rel, size));
            continue;
        }

        let lines = std::fs::read_to_string(path)
            .map(|content| content.lines().count())
            .unwrap_or(0);

        entries.push(FileEntry {
            path: rel,
            kind: EntryKind::File,
            size,
            lines,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    doc_files.sort();
    manifests.sort_by(|a, b| a.path.cmp(&b.path));

    let mut files_by_extension: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_size = 0u64;
    for entry in &entries {
        total_size += entry.size;
        if let Some(ext) = entry.path.rsplit('.').next() {
            *files_by_extension.entry(ext.to_string()).or_insert(0) += 1;
        }
    }

    let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
    let hashes = hash_files(root, &paths);
    let todos = scan_todos(root, &paths);
    let testing = summarize_testing(&paths);
    let scored_files = score_files(root, &entries, &oversized, config);

    let readme_present = doc_files
        .iter()
        .any(|p| p.eq_ignore_ascii_case("readme.md"));

    let snapshot = AnalysisSnapshot {
        file_tree: FileTreeSummary {
            total_files: entries.len(),
            total_size,
            files_by_extension,
            directory_tree: entries,
        },
        manifests,
        todos,
        testing,
        docs: DocsSummary {
            files: doc_files,
            readme_present,
        },
        metadata: SnapshotMetadata {
            analyzed_at: Utc::now(),
            root_dir: root.display().to_string(),
            file_count: paths.len(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        },
        ..Default::default()
    };

    info!(
        "static analysis found {} source files in {}ms",
        snapshot.file_tree.total_files, snapshot.metadata.elapsed_ms
    );

    Ok(ScanOutput {
        snapshot,
        hashes,
        scored_files,
    })
}

/// Compile glob patterns into a matcher; `None` when no patterns are given.
fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            crate::core::errors::HandoverError::config_field(
                format!("invalid glob pattern '{pattern}': {e}"),
                "include/exclude",
            )
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| crate::core::errors::HandoverError::config(format!("glob set: {e}")))
}

/// Normalize a path to repository-relative form with forward slashes.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Scan source files for TODO and FIXME markers.
fn scan_todos(root: &Path, paths: &[String]) -> Vec<TodoItem> {
    let mut todos = Vec::new();
    for rel in paths {
        let Ok(content) = std::fs::read_to_string(root.join(rel)) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if let Some(pos) = line.find("TODO").or_else(|| line.find("FIXME")) {
                todos.push(TodoItem {
                    path: rel.clone(),
                    line: idx + 1,
                    text: line[pos..].trim().to_string(),
                });
            }
        }
    }
    todos
}

/// Count test files and guess at frameworks from path conventions.
fn summarize_testing(paths: &[String]) -> TestingSummary {
    let test_file_count = paths.iter().filter(|p| is_test_file(p)).count();
    let mut frameworks = Vec::new();
    if paths.iter().any(|p| p.ends_with(".rs")) && test_file_count > 0 {
        frameworks.push("cargo-test".to_string());
    }
    if paths
        .iter()
        .any(|p| p.contains(".test.") || p.contains(".spec."))
    {
        frameworks.push("jest".to_string());
    }
    if paths
        .iter()
        .any(|p| p.starts_with("test_") || p.contains("/test_"))
    {
        frameworks.push("pytest".to_string());
    }
    TestingSummary {
        frameworks,
        test_file_count,
    }
}

/// Check if a file path indicates it's a test file.
pub fn is_test_file(path: &str) -> bool {
    path.starts_with("tests/")
        || path.starts_with("test/")
        || path.contains("/tests/")
        || path.contains("/test/")
        || path.contains("/__tests__/")
        || path.contains(".test.")
        || path.contains(".spec.")
        || path.ends_with("_test.rs")
        || path.ends_with("_test.go")
        || path.ends_with("_test.py")
        || path.starts_with("test_")
        || path.contains("/test_")
}

/// Load content and assign an importance score to every candidate file.
fn score_files(
    root: &Path,
    entries: &[FileEntry],
    oversized: &[(String, u64)],
    config: &HandoverConfig,
) -> Vec<ScoredFile> {
    let boost_patterns: Vec<glob::Pattern> = config
        .context_window
        .boost
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut scored = Vec::with_capacity(entries.len() + oversized.len());

    for entry in entries {
        if let Ok(content) = std::fs::read_to_string(root.join(&entry.path)) {
            let mut importance = file_importance(&entry.path, entry.size);
            if boost_patterns.iter().any(|p| p.matches(&entry.path)) {
                importance += 5.0;
            }
            scored.push(ScoredFile {
                path: entry.path.clone(),
                size: entry.size,
                importance,
                content,
                changed: false,
            });
        }
    }

    for (rel, size) in oversized {
        if let Ok(content) = std::fs::read_to_string(root.join(rel)) {
            scored.push(ScoredFile {
                path: rel.clone(),
                size: *size,
                importance: file_importance(rel, *size),
                content,
                changed: false,
            });
        }
    }

    scored.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    scored
}

/// Importance heuristic for file inclusion ordering.
fn file_importance(path: &str, size: u64) -> f64 {
    let mut importance = 1.0;

    if path.contains("main.") || path.contains("lib.rs") || path.contains("mod.rs") {
        importance += 3.0;
    }
    if path.contains("index.") || path.contains("app.") {
        importance += 2.0;
    }
    if path.contains("config") || path.contains("error") || path.contains("api") {
        importance += 2.0;
    }
    if path.contains("core") || path.contains("engine") {
        importance += 1.5;
    }

    // Very large files burn budget; focused files are a better spend.
    if size > 50_000 {
        importance *= 0.5;
    } else if size > 20_000 {
        importance *= 0.7;
    }
    if size < 1_000 {
        importance *= 1.2;
    }

    if is_test_file(path) {
        importance *= 0.3;
    }

    importance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_collects_source_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "src/lib.rs", "pub fn run() {}\n");
        write(dir.path(), "README.md", "# Project\n");
        write(dir.path(), "image.png", "not really a png");

        let output = scan_repository(dir.path(), &HandoverConfig::default()).unwrap();
        let snapshot = &output.snapshot;

        assert_eq!(snapshot.file_tree.total_files, 2);
        assert!(snapshot.docs.readme_present);
        assert!(snapshot.file_entry("src/main.rs").is_some());
        assert!(snapshot.file_entry("image.png").is_none());
        assert_eq!(output.hashes.len(), 2);
    }

    #[test]
    fn test_scan_readme_only_repo_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# Just docs\n");

        let output = scan_repository(dir.path(), &HandoverConfig::default()).unwrap();
        assert!(output.snapshot.is_empty_repo());
        assert!(output.scored_files.is_empty());
    }

    #[test]
    fn test_scan_skips_ignored_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;\n");
        write(dir.path(), "target/debug/gen.rs", "fn gen() {}\n");

        let output = scan_repository(dir.path(), &HandoverConfig::default()).unwrap();
        assert_eq!(output.snapshot.file_tree.total_files, 1);
    }

    #[test]
    fn test_scan_records_todos() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {\n    // TODO: wire flags\n}\n");

        let output = scan_repository(dir.path(), &HandoverConfig::default()).unwrap();
        assert_eq!(output.snapshot.todos.len(), 1);
        assert_eq!(output.snapshot.todos[0].line, 2);
    }

    #[test]
    fn test_exclude_patterns_respected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "gen/schema.rs", "pub struct S;\n");

        let mut config = HandoverConfig::default();
        config.exclude = vec!["gen/**".to_string()];

        let output = scan_repository(dir.path(), &config).unwrap();
        assert_eq!(output.snapshot.file_tree.total_files, 1);
    }
}
