//! Claim validation for round outputs.
//!
//! Models cite file paths and imports; both kinds of claim are checked
//! against the analysis snapshot before an output is accepted. Unknown
//! paths are dropped, or rewritten when exactly one real file shares the
//! claimed basename. The resulting drop rate feeds the runner's retry
//! decision.

use std::collections::BTreeSet;

use crate::analysis::snapshot::{AnalysisSnapshot, EntryKind};
use crate::rounds::outputs::{ImportClaim, RoundOutput};
use crate::rounds::RoundValidation;

/// Statistics from one validation pass.
pub type ValidationStats = RoundValidation;

/// Normalize a claimed path: forward slashes, no leading `./` or `/`.
pub fn normalize_claim_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.strip_prefix("./").unwrap_or(&path);
    path.trim_start_matches('/').to_string()
}

/// Validate and clean every claim in a round output.
pub fn validate_round_claims(
    output: &mut RoundOutput,
    snapshot: &AnalysisSnapshot,
) -> ValidationStats {
    let known = known_files(snapshot);
    let mut stats = Counter::default();

    match output {
        RoundOutput::Architecture(o) => {
            for layer in &mut o.layers {
                clean_paths(&mut layer.files, &known, &mut stats);
            }
            clean_paths(&mut o.entry_points, &known, &mut stats);
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
        RoundOutput::Modules(o) => {
            for module in &mut o.modules {
                clean_paths(&mut module.files, &known, &mut stats);
            }
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
        RoundOutput::DataFlow(o) => {
            clean_imports(&mut o.imports, snapshot, &known, &mut stats);
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
        RoundOutput::Interfaces(o) => {
            o.interfaces.retain_mut(|interface| {
                stats.total += 1;
                match resolve_path(&interface.file, &known) {
                    Resolution::Valid => {
                        stats.validated += 1;
                        true
                    }
                    Resolution::Corrected(fixed) => {
                        interface.file = fixed;
                        stats.validated += 1;
                        stats.corrected += 1;
                        true
                    }
                    Resolution::Unknown => false,
                }
            });
            clean_imports(&mut o.imports, snapshot, &known, &mut stats);
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
        RoundOutput::DeepDive(o) => {
            for detail in o.module_details.iter_mut().flatten() {
                clean_paths(&mut detail.key_files, &known, &mut stats);
            }
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
        RoundOutput::Guidance(o) => {
            for finding in &mut o.findings {
                clean_paths(&mut finding.files, &known, &mut stats);
            }
        }
    }

    stats.into_validation()
}

/// Validate a list of claimed file paths against the snapshot.
///
/// Returns the surviving paths and the dropped claims.
pub fn validate_file_claims(
    paths: &[String],
    snapshot: &AnalysisSnapshot,
) -> (Vec<String>, Vec<String>) {
    let known = known_files(snapshot);
    let mut valid = Vec::new();
    let mut dropped = Vec::new();
    for path in paths {
        match resolve_path(path, &known) {
            Resolution::Valid => valid.push(normalize_claim_path(path)),
            Resolution::Corrected(fixed) => valid.push(fixed),
            Resolution::Unknown => dropped.push(path.clone()),
        }
    }
    (valid, dropped)
}

/// Validate claimed imports against the per-file AST import records.
pub fn validate_import_claims(
    claims: &[ImportClaim],
    snapshot: &AnalysisSnapshot,
) -> (Vec<ImportClaim>, Vec<ImportClaim>) {
    let mut valid = Vec::new();
    let mut dropped = Vec::new();
    for claim in claims {
        if import_exists(claim, snapshot) {
            valid.push(claim.clone());
        } else {
            dropped.push(claim.clone());
        }
    }
    (valid, dropped)
}

fn import_exists(claim: &ImportClaim, snapshot: &AnalysisSnapshot) -> bool {
    let source = normalize_claim_path(&claim.source_file);
    snapshot.ast.files.get(&source).is_some_and(|ast| {
        ast.imports.iter().any(|record| {
            record.module == claim.imported_symbol
                || record.symbols.iter().any(|s| s == &claim.imported_symbol)
        })
    })
}

#[derive(Default)]
struct Counter {
    total: usize,
    validated: usize,
    corrected: usize,
}

impl Counter {
    fn into_validation(self) -> ValidationStats {
        let dropped = self.total - self.validated;
        ValidationStats {
            total: self.total,
            validated: self.validated,
            corrected: self.corrected,
            drop_rate: if self.total == 0 {
                0.0
            } else {
                dropped as f64 / self.total as f64
            },
        }
    }
}

enum Resolution {
    Valid,
    Corrected(String),
    Unknown,
}

fn known_files(snapshot: &AnalysisSnapshot) -> BTreeSet<&str> {
    snapshot
        .file_tree
        .directory_tree
        .iter()
        .filter(|e| e.kind == EntryKind::File)
        .map(|e| e.path.as_str())
        .collect()
}

fn resolve_path(claimed: &str, known: &BTreeSet<&str>) -> Resolution {
    let normalized = normalize_claim_path(claimed);
    if known.contains(normalized.as_str()) {
        return Resolution::Valid;
    }

    // Accept a basename match when it is unambiguous.
    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    let mut matches = known.iter().filter(|k| {
        k.rsplit('/').next().unwrap_or(k) == basename
    });
    match (matches.next(), matches.next()) {
        (Some(only), None) => Resolution::Corrected(only.to_string()),
        _ => Resolution::Unknown,
    }
}

fn clean_paths(paths: &mut Vec<String>, known: &BTreeSet<&str>, stats: &mut Counter) {
    let mut cleaned = Vec::with_capacity(paths.len());
    for path in paths.drain(..) {
        stats.total += 1;
        match resolve_path(&path, known) {
            Resolution::Valid => {
                stats.validated += 1;
                cleaned.push(normalize_claim_path(&path));
            }
            Resolution::Corrected(fixed) => {
                stats.validated += 1;
                stats.corrected += 1;
                cleaned.push(fixed);
            }
            Resolution::Unknown => {}
        }
    }
    *paths = cleaned;
}

fn clean_imports(
    imports: &mut Vec<ImportClaim>,
    snapshot: &AnalysisSnapshot,
    known: &BTreeSet<&str>,
    stats: &mut Counter,
) {
    imports.retain(|claim| {
        stats.total += 1;
        let source_ok = matches!(
            resolve_path(&claim.source_file, known),
            Resolution::Valid | Resolution::Corrected(_)
        );
        if source_ok && import_exists(claim, snapshot) {
            stats.validated += 1;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::snapshot::{FileAst, FileEntry, ImportRecord};
    use crate::rounds::outputs::{ModuleSummary, ModulesOutput};

    fn snapshot_with(paths: &[&str]) -> AnalysisSnapshot {
        let mut snapshot = AnalysisSnapshot::default();
        snapshot.file_tree.directory_tree = paths
            .iter()
            .map(|p| FileEntry {
                path: p.to_string(),
                kind: EntryKind::File,
                size: 10,
                lines: 1,
            })
            .collect();
        snapshot.file_tree.total_files = paths.len();
        snapshot
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_claim_path("./src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_claim_path("/src/lib.rs"), "src/lib.rs");
        assert_eq!(normalize_claim_path("src\\lib.rs"), "src/lib.rs");
    }

    #[test]
    fn test_unknown_paths_dropped() {
        let snapshot = snapshot_with(&["src/lib.rs"]);
        let (valid, dropped) = validate_file_claims(
            &["src/lib.rs".to_string(), "src/imagined.rs".to_string()],
            &snapshot,
        );
        assert_eq!(valid, vec!["src/lib.rs".to_string()]);
        assert_eq!(dropped, vec!["src/imagined.rs".to_string()]);
    }

    #[test]
    fn test_path_comparison_is_case_sensitive() {
        let snapshot = snapshot_with(&["src/lib.rs"]);
        let (valid, dropped) =
            validate_file_claims(&["src/LIB.rs".to_string()], &snapshot);
        assert!(valid.is_empty());
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn test_unambiguous_basename_corrected() {
        let snapshot = snapshot_with(&["src/deep/nested/config.rs", "src/main.rs"]);
        let (valid, dropped) = validate_file_claims(&["config.rs".to_string()], &snapshot);
        assert_eq!(valid, vec!["src/deep/nested/config.rs".to_string()]);
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_import_claims_checked_against_ast() {
        let mut snapshot = snapshot_with(&["src/app.ts"]);
        snapshot.ast.files.insert(
            "src/app.ts".to_string(),
            FileAst {
                imports: vec![ImportRecord {
                    module: "express".to_string(),
                    symbols: vec!["Router".to_string()],
                }],
                ..Default::default()
            },
        );

        let claims = vec![
            ImportClaim {
                source_file: "src/app.ts".to_string(),
                imported_symbol: "Router".to_string(),
            },
            ImportClaim {
                source_file: "src/app.ts".to_string(),
                imported_symbol: "Fastify".to_string(),
            },
        ];
        let (valid, dropped) = validate_import_claims(&claims, &snapshot);
        assert_eq!(valid.len(), 1);
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn test_round_validation_counts_drop_rate() {
        let snapshot = snapshot_with(&["src/a.rs"]);
        let mut output = RoundOutput::Modules(ModulesOutput {
            modules: vec![ModuleSummary {
                name: "core".to_string(),
                purpose: "stuff".to_string(),
                files: vec![
                    "src/a.rs".to_string(),
                    "src/phantom.rs".to_string(),
                    "src/ghost.rs".to_string(),
                    "src/spirit.rs".to_string(),
                ],
                public_api: Vec::new(),
            }],
            findings: Vec::new(),
            open_questions: Vec::new(),
        });

        let stats = validate_round_claims(&mut output, &snapshot);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.validated, 1);
        assert!((stats.drop_rate - 0.75).abs() < 1e-9);
        assert_eq!(output.modules()[0].files, vec!["src/a.rs".to_string()]);
    }
}
