//! Analysis snapshot data model.
//!
//! The snapshot is produced once per run by the static-analysis step and
//! consumed read-only by the packer, the claim validator, and the renderers.
//! Individual analyzers (tree-sitter parsers, git readers, manifest readers)
//! populate their own sections; sections they do not cover stay empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Complete analysis snapshot for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSnapshot {
    /// File tree summary of the repository
    pub file_tree: FileTreeSummary,
    /// Per-file AST summary (exports and imports)
    pub ast: AstSummary,
    /// Dependency manifests discovered at the repository root
    pub manifests: Vec<DependencyManifest>,
    /// Git history summary
    pub git: GitSummary,
    /// TODO/FIXME markers found in source files
    pub todos: Vec<TodoItem>,
    /// Environment variables read by the code
    pub env_vars: Vec<EnvVarUse>,
    /// Testing setup summary
    pub testing: TestingSummary,
    /// Documentation files summary
    pub docs: DocsSummary,
    /// Run metadata
    pub metadata: SnapshotMetadata,
}

/// Summary of the repository file tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileTreeSummary {
    /// Number of source files included in the tree
    pub total_files: usize,
    /// Combined size of included files in bytes
    pub total_size: u64,
    /// File counts keyed by extension
    pub files_by_extension: BTreeMap<String, usize>,
    /// Included files and directories, repository-relative, forward slashes
    pub directory_tree: Vec<FileEntry>,
}

/// A single entry in the directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Repository-relative path with forward slashes
    pub path: String,
    /// Whether this entry is a file or a directory
    pub kind: EntryKind,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Line count (0 for directories)
    pub lines: usize,
}

/// Kind of a directory-tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
}

/// Per-file AST information plus global counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AstSummary {
    /// AST details keyed by repository-relative file path
    pub files: BTreeMap<String, FileAst>,
    /// Total exported functions across the repository
    pub total_functions: usize,
    /// Total exported classes across the repository
    pub total_classes: usize,
    /// Total import statements across the repository
    pub total_imports: usize,
}

/// AST details for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileAst {
    /// Exported functions
    pub functions: Vec<FunctionSig>,
    /// Exported classes
    pub classes: Vec<ClassSig>,
    /// Exported constants
    pub constants: Vec<ConstSig>,
    /// Import statements
    pub imports: Vec<ImportRecord>,
}

/// Signature of an exported function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionSig {
    /// Function name
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<ParamSig>,
    /// Declared return type, when known
    pub return_type: Option<String>,
    /// Whether the function is async
    pub is_async: bool,
}

/// A typed function parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParamSig {
    /// Parameter name
    pub name: String,
    /// Declared type, when known
    pub type_name: Option<String>,
}

/// Signature of an exported class.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassSig {
    /// Class name
    pub name: String,
    /// Generic parameters as written in the source
    pub generics: Option<String>,
    /// Base class, when any
    pub extends: Option<String>,
    /// Implemented interfaces
    pub implements: Vec<String>,
    /// Public methods only
    pub methods: Vec<FunctionSig>,
}

/// Signature of an exported constant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConstSig {
    /// Constant name
    pub name: String,
    /// Declared type, when known
    pub type_name: Option<String>,
    /// Whether an initializer is present
    pub has_value: bool,
}

/// One import statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    /// Module or package the symbols come from
    pub module: String,
    /// Imported symbol names (empty for whole-module imports)
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// A dependency manifest found in the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyManifest {
    /// Repository-relative manifest path
    pub path: String,
    /// Manifest kind ("cargo", "npm", "pip", ...)
    pub kind: String,
    /// Declared dependency names
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Git history summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GitSummary {
    /// Observed branch naming patterns
    pub branch_patterns: Vec<String>,
    /// Recent commit subjects, newest first
    pub recent_commits: Vec<CommitInfo>,
    /// Primary author per file path
    pub file_ownership: BTreeMap<String, String>,
    /// Commit counts keyed by "YYYY-MM"
    pub activity_by_month: BTreeMap<String, usize>,
    /// Non-fatal issues encountered while reading history
    pub warnings: Vec<String>,
}

/// One recent commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Abbreviated commit hash
    pub hash: String,
    /// Commit subject line
    pub subject: String,
    /// Author name
    pub author: String,
    /// Commit timestamp
    pub date: DateTime<Utc>,
}

/// A TODO/FIXME marker in a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    /// Repository-relative file path
    pub path: String,
    /// 1-based line number
    pub line: usize,
    /// Marker text
    pub text: String,
}

/// An environment variable read somewhere in the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarUse {
    /// Variable name
    pub name: String,
    /// Repository-relative file that reads it
    pub path: String,
}

/// Summary of the repository's testing setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TestingSummary {
    /// Detected test frameworks
    pub frameworks: Vec<String>,
    /// Number of test files
    pub test_file_count: usize,
}

/// Summary of documentation files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocsSummary {
    /// Repository-relative documentation files
    pub files: Vec<String>,
    /// Whether a README is present at the root
    pub readme_present: bool,
}

/// Metadata about the snapshot itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// When the analysis ran
    pub analyzed_at: DateTime<Utc>,
    /// Absolute path of the analyzed repository root
    pub root_dir: String,
    /// Number of source files analyzed
    pub file_count: usize,
    /// Analysis wall time in milliseconds
    pub elapsed_ms: u64,
}

impl Default for SnapshotMetadata {
    fn default() -> Self {
        Self {
            analyzed_at: Utc::now(),
            root_dir: String::new(),
            file_count: 0,
            elapsed_ms: 0,
        }
    }
}

impl AnalysisSnapshot {
    /// Whether the repository contains no source files.
    pub fn is_empty_repo(&self) -> bool {
        self.file_tree.total_files == 0
    }

    /// Look up a file entry by its repository-relative path.
    pub fn file_entry(&self, path: &str) -> Option<&FileEntry> {
        self.file_tree
            .directory_tree
            .iter()
            .find(|e| e.kind == EntryKind::File && e.path == path)
    }
}
