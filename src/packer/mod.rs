//! Priority-tiered, budget-bounded context packing.
//!
//! The packer turns importance-scored files into a packed context that fits
//! a token budget. Each file lands in exactly one tier: full content,
//! signature summary, or skip. Output is byte-deterministic for identical
//! inputs so cache keys built on top of it stay stable.

pub mod signatures;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::incremental::ChangedFileSet;
use crate::analysis::snapshot::AstSummary;
use signatures::{join_sections, signature_summary};

/// A file whose own full content exceeds this token count is never emitted
/// at the full tier.
pub const OVERSIZED_THRESHOLD_TOKENS: usize = 25_000;

/// Line span summarized per section when an oversized file has no AST.
const OVERSIZED_SECTION_LINES: usize = 500;

/// Token budget handed to the packer.
#[derive(Debug, Clone, Copy)]
pub struct PackingBudget {
    /// Hard ceiling on the sum of packed file tokens
    pub max_tokens: usize,
    /// Tokens held back for prompt scaffolding
    pub reserve_for_prompt: usize,
    /// Characters-per-token ratio for the default estimator
    pub chars_per_token: usize,
}

impl Default for PackingBudget {
    fn default() -> Self {
        Self {
            max_tokens: 120_000,
            reserve_for_prompt: 8_000,
            chars_per_token: crate::core::tokens::DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

/// A file scored for packing by upstream analysis.
#[derive(Debug, Clone)]
pub struct ScoredFile {
    /// Repository-relative path
    pub path: String,
    /// Size in bytes
    pub size: u64,
    /// Importance score, higher packs earlier
    pub importance: f64,
    /// Full file content
    pub content: String,
    /// Whether the file changed since the previous run
    pub changed: bool,
}

/// Tier assigned to a packed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackTier {
    /// Verbatim source content
    Full,
    /// Deterministic signature summary
    Signatures,
    /// Excluded from the context
    Skip,
}

/// One file in the packed context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedFile {
    /// Repository-relative path
    pub path: String,
    /// Assigned tier
    pub tier: PackTier,
    /// Token cost of the emitted content
    pub tokens: usize,
    /// Emitted content (empty for the skip tier)
    pub content: String,
}

/// Result of packing a file set into the budget.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedContext {
    /// Packed files sorted by path
    pub files: Vec<PackedFile>,
    /// Sum of packed file tokens
    pub total_tokens: usize,
    /// Counts describing the packing outcome
    pub metadata: PackMetadata,
}

/// Counts describing a packing outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
    /// Number of files present in the packed context
    pub analyzed_count: usize,
    /// Number of input files emitted at the skip tier
    pub ignored_count: usize,
}

impl PackedContext {
    /// Render the packed files as one prompt-ready text block.
    pub fn as_prompt_block(&self) -> String {
        let mut out = String::new();
        for file in &self.files {
            if file.tier == PackTier::Skip {
                continue;
            }
            out.push_str(&format!(
                "<file path=\"{}\" tier=\"{}\" tokens=\"{}\">\n{}\n</file>\n",
                file.path,
                match file.tier {
                    PackTier::Full => "full",
                    PackTier::Signatures => "signatures",
                    PackTier::Skip => unreachable!(),
                },
                file.tokens,
                file.content
            ));
        }
        out
    }

    /// Fraction of input files that made it into the context.
    pub fn coverage(&self) -> f64 {
        if self.metadata.analyzed_count == 0 {
            return 0.0;
        }
        let included = self.metadata.analyzed_count - self.metadata.ignored_count;
        included as f64 / self.metadata.analyzed_count as f64
    }
}

/// Token-budget-aware packer over importance-scored files.
pub struct ContextPacker {
    budget: PackingBudget,
    estimator: Box<dyn Fn(&str) -> usize + Send + Sync>,
}

impl ContextPacker {
    /// Create a packer with the chars-per-token estimator from the budget.
    pub fn new(budget: PackingBudget) -> Self {
        let ratio = budget.chars_per_token.max(1);
        Self {
            budget,
            estimator: Box::new(move |text| text.len() / ratio),
        }
    }

    /// Replace the token estimator.
    pub fn with_estimator(
        mut self,
        estimator: impl Fn(&str) -> usize + Send + Sync + 'static,
    ) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Pack the files into the budget.
    ///
    /// `files` must be ordered importance-descending with path tiebreaks;
    /// `pinned` paths always get full content when the oversize rule allows
    /// it; `changed` paths are promoted ahead of everything else and never
    /// fall to the skip tier.
    pub fn pack(
        &self,
        files: &[ScoredFile],
        changed: &ChangedFileSet,
        pinned: &BTreeSet<String>,
        ast: &AstSummary,
    ) -> PackedContext {
        let budget = self
            .budget
            .max_tokens
            .saturating_sub(self.budget.reserve_for_prompt);

        let mut packed: Vec<PackedFile> = Vec::with_capacity(files.len());
        let mut remaining = budget;

        let full_tokens: Vec<usize> = files
            .iter()
            .map(|f| (self.estimator)(&f.content))
            .collect();
        let any_oversized = full_tokens
            .iter()
            .any(|t| *t > OVERSIZED_THRESHOLD_TOKENS);

        // Fast path: everything fits at full content and nothing trips the
        // oversize rule.
        let total_full: usize = full_tokens.iter().sum();
        if !any_oversized && total_full <= remaining {
            for (file, &tokens) in files.iter().zip(&full_tokens) {
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Full,
                    tokens,
                    content: file.content.clone(),
                });
            }
            return Self::finalize(packed);
        }

        let mut handled: BTreeSet<&str> = BTreeSet::new();

        // Changed files are promoted ahead of the walk: full when it fits,
        // signatures otherwise, never skip. Oversized changed files go
        // straight to signatures.
        for (file, &tokens) in files.iter().zip(&full_tokens) {
            if !changed.contains(&file.path) && !file.changed {
                continue;
            }
            let oversized = tokens > OVERSIZED_THRESHOLD_TOKENS;
            if !oversized && tokens <= remaining {
                remaining -= tokens;
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Full,
                    tokens,
                    content: file.content.clone(),
                });
            } else {
                let summary = if oversized {
                    self.oversized_summary(file, ast)
                } else {
                    signature_summary(&file.path, &file.content, ast.files.get(&file.path))
                };
                let (sig_tokens, content) = self.fit_summary_tokens(&summary, &mut remaining);
                debug!(
                    "changed file {} packed at signatures tier ({} tokens)",
                    file.path, sig_tokens
                );
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Signatures,
                    tokens: sig_tokens,
                    content,
                });
            }
            handled.insert(file.path.as_str());
        }

        // Pinned files keep full content when the budget and the oversize
        // rule allow it; otherwise they take their chances in the walk.
        for (file, &tokens) in files.iter().zip(&full_tokens) {
            if handled.contains(file.path.as_str()) || !pinned.contains(&file.path) {
                continue;
            }
            if tokens <= OVERSIZED_THRESHOLD_TOKENS && tokens <= remaining {
                remaining -= tokens;
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Full,
                    tokens,
                    content: file.content.clone(),
                });
                handled.insert(file.path.as_str());
            }
        }

        // Single walk in importance order, richest tier first. The oversize
        // rule applies inline: such files never get full content, whatever
        // the remaining budget.
        for (file, &tokens) in files.iter().zip(&full_tokens) {
            if handled.contains(file.path.as_str()) {
                continue;
            }
            let oversized = tokens > OVERSIZED_THRESHOLD_TOKENS;
            if !oversized && tokens <= remaining {
                remaining -= tokens;
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Full,
                    tokens,
                    content: file.content.clone(),
                });
                continue;
            }

            let summary = if oversized {
                self.oversized_summary(file, ast)
            } else {
                signature_summary(&file.path, &file.content, ast.files.get(&file.path))
            };
            let sig_tokens = (self.estimator)(&summary);
            if sig_tokens <= remaining {
                remaining -= sig_tokens;
                packed.push(PackedFile {
                    path: file.path.clone(),
                    tier: PackTier::Signatures,
                    tokens: sig_tokens,
                    content: summary,
                });
                continue;
            }

            debug!("skipping {} ({} tokens over budget)", file.path, tokens);
            packed.push(PackedFile {
                path: file.path.clone(),
                tier: PackTier::Skip,
                tokens: 0,
                content: String::new(),
            });
        }

        Self::finalize(packed)
    }

    /// Signature emission for an oversized file: one summary per section of
    /// the file, joined with the stable section marker.
    fn oversized_summary(&self, file: &ScoredFile, ast: &AstSummary) -> String {
        if let Some(file_ast) = ast.files.get(&file.path) {
            return join_sections(&[signature_summary(&file.path, &file.content, Some(file_ast))]);
        }

        let lines: Vec<&str> = file.content.lines().collect();
        let sections: Vec<String> = lines
            .chunks(OVERSIZED_SECTION_LINES)
            .enumerate()
            .map(|(idx, chunk)| {
                let start_line = idx * OVERSIZED_SECTION_LINES + 1;
                signature_summary(
                    &format!("{}#L{start_line}", file.path),
                    &chunk.join("\n"),
                    None,
                )
            })
            .collect();
        join_sections(&sections)
    }

    /// Charge a summary against the remaining budget, trimming trailing
    /// lines when it does not fit outright. The header line is always kept.
    fn fit_summary_tokens(&self, summary: &str, remaining: &mut usize) -> (usize, String) {
        let mut lines: Vec<&str> = summary.lines().collect();
        loop {
            let candidate = lines.join("\n");
            let tokens = (self.estimator)(&candidate);
            if tokens <= *remaining || lines.len() <= 1 {
                let charged = tokens.min(*remaining);
                *remaining -= charged;
                return (charged, candidate);
            }
            lines.truncate(lines.len() / 2);
        }
    }

    fn finalize(mut packed: Vec<PackedFile>) -> PackedContext {
        packed.sort_by(|a, b| a.path.cmp(&b.path));
        let total_tokens = packed.iter().map(|f| f.tokens).sum();
        let ignored_count = packed.iter().filter(|f| f.tier == PackTier::Skip).count();
        let analyzed_count = packed.len();
        PackedContext {
            files: packed,
            total_tokens,
            metadata: PackMetadata {
                analyzed_count,
                ignored_count,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(path: &str, content: &str, importance: f64) -> ScoredFile {
        ScoredFile {
            path: path.to_string(),
            size: content.len() as u64,
            importance,
            content: content.to_string(),
            changed: false,
        }
    }

    fn packer(max_tokens: usize) -> ContextPacker {
        ContextPacker::new(PackingBudget {
            max_tokens,
            reserve_for_prompt: 0,
            chars_per_token: 4,
        })
    }

    fn no_changes() -> ChangedFileSet {
        ChangedFileSet::new()
    }

    #[test]
    fn test_fast_path_packs_everything_full() {
        let files = vec![
            scored("b.rs", "fn b() {}", 2.0),
            scored("a.rs", "fn a() {}", 1.0),
        ];
        let ctx = packer(10_000).pack(&files, &no_changes(), &BTreeSet::new(), &Default::default());

        assert_eq!(ctx.files.len(), 2);
        assert!(ctx.files.iter().all(|f| f.tier == PackTier::Full));
        // Output is path-sorted regardless of importance order.
        assert_eq!(ctx.files[0].path, "a.rs");
        assert_eq!(ctx.metadata.ignored_count, 0);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let big = "x".repeat(4_000); // 1000 tokens
        let files = vec![
            scored("a.rs", &big, 3.0),
            scored("b.rs", &big, 2.0),
            scored("c.rs", &big, 1.0),
        ];
        let ctx = packer(1_500).pack(&files, &no_changes(), &BTreeSet::new(), &Default::default());

        assert!(ctx.total_tokens <= 1_500);
        assert_eq!(ctx.files.len(), 3);
    }

    #[test]
    fn test_every_input_appears_exactly_once() {
        let big = "x".repeat(40_000);
        let files = vec![
            scored("a.rs", &big, 3.0),
            scored("b.rs", "fn b() {}", 2.0),
            scored("c.rs", &big, 1.0),
        ];
        let ctx = packer(5_000).pack(&files, &no_changes(), &BTreeSet::new(), &Default::default());

        let mut paths: Vec<&str> = ctx.files.iter().map(|f| f.path.as_str()).collect();
        paths.dedup();
        assert_eq!(paths, vec!["a.rs", "b.rs", "c.rs"]);
    }

    #[test]
    fn test_changed_file_never_skipped() {
        let big = "x".repeat(40_000); // 10k tokens each
        let files = vec![
            scored("hot.rs", &big, 0.1),
            scored("a.rs", &big, 3.0),
            scored("b.rs", &big, 2.0),
        ];
        let changed: ChangedFileSet = ["hot.rs".to_string()].into_iter().collect();
        let ctx = packer(12_000).pack(&files, &changed, &BTreeSet::new(), &Default::default());

        let hot = ctx.files.iter().find(|f| f.path == "hot.rs").unwrap();
        assert_ne!(hot.tier, PackTier::Skip);
        assert!(ctx.total_tokens <= 12_000);
    }

    #[test]
    fn test_oversized_file_forced_to_signatures() {
        let giant = "let x = 1;\n".repeat(30_000); // far over the threshold
        let small = "fn tiny() {}";
        let mut files = vec![scored("giant.rs", &giant, 10.0)];
        for i in 0..10 {
            files.push(scored(&format!("small{i}.rs"), small, 1.0));
        }

        let ctx =
            packer(500_000).pack(&files, &no_changes(), &BTreeSet::new(), &Default::default());

        let giant_entry = ctx.files.iter().find(|f| f.path == "giant.rs").unwrap();
        assert_eq!(giant_entry.tier, PackTier::Signatures);
        assert!(giant_entry.content.contains(signatures::SECTION_MARKER));
        assert!(ctx
            .files
            .iter()
            .filter(|f| f.path != "giant.rs")
            .all(|f| f.tier == PackTier::Full));
        assert!(ctx.total_tokens <= 500_000);
    }

    #[test]
    fn test_walk_visits_oversized_files_in_importance_order() {
        // A high-importance normal file must not lose budget to a
        // low-importance oversized file packed later in the walk.
        let important = "y".repeat(4_000); // 1000 tokens, fills the budget
        let giant = "let q = 9;\n".repeat(30_000); // over the full-tier threshold
        let files = vec![
            scored("a.rs", &important, 5.0),
            scored("huge.rs", &giant, 0.5),
        ];

        let ctx = packer(1_000).pack(&files, &no_changes(), &BTreeSet::new(), &Default::default());

        let a = ctx.files.iter().find(|f| f.path == "a.rs").unwrap();
        let huge = ctx.files.iter().find(|f| f.path == "huge.rs").unwrap();
        assert_eq!(a.tier, PackTier::Full);
        assert_eq!(huge.tier, PackTier::Skip);
        assert!(ctx.total_tokens <= 1_000);
    }

    #[test]
    fn test_determinism() {
        let big = "x".repeat(40_000);
        let files = vec![
            scored("a.rs", &big, 3.0),
            scored("b.rs", "fn b() {}", 2.0),
            scored("c.rs", &big, 1.0),
        ];
        let changed: ChangedFileSet = ["b.rs".to_string()].into_iter().collect();

        let a = packer(5_000).pack(&files, &changed, &BTreeSet::new(), &Default::default());
        let b = packer(5_000).pack(&files, &changed, &BTreeSet::new(), &Default::default());
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn test_pinned_file_gets_full_content() {
        let big = "x".repeat(4_000); // 1000 tokens
        let files = vec![
            scored("a.rs", &big, 3.0),
            scored("b.rs", &big, 2.0),
            scored("pinned.rs", &big, 0.1),
        ];
        let pinned: BTreeSet<String> = ["pinned.rs".to_string()].into_iter().collect();
        let ctx = packer(1_800).pack(&files, &no_changes(), &pinned, &Default::default());

        let entry = ctx.files.iter().find(|f| f.path == "pinned.rs").unwrap();
        assert_eq!(entry.tier, PackTier::Full);
    }
}
