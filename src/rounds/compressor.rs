//! Round-output compression for downstream prompts.
//!
//! A round's full output is too large to replay into every dependent round,
//! so it is condensed into a bounded text block holding the module list,
//! findings, relationships, and open questions. Trimming happens in a fixed
//! order until the block fits its token budget.

use serde::{Deserialize, Serialize};

use crate::rounds::outputs::{Finding, ModuleSummary, Relationship, RoundOutput};

/// Compressed projection of a round output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundContext {
    /// Round the projection came from
    pub round_number: u8,
    /// Module list carried downstream
    pub modules: Vec<ModuleSummary>,
    /// Findings carried downstream
    pub findings: Vec<Finding>,
    /// Relationships carried downstream
    pub relationships: Vec<Relationship>,
    /// Open questions carried downstream
    pub open_questions: Vec<String>,
    /// Token estimate of the rendered block
    pub token_count: usize,
}

impl RoundContext {
    /// Render the context as a prompt-ready text block.
    pub fn render(&self) -> String {
        render_sections(
            self.round_number,
            &self.modules,
            &self.findings,
            &self.relationships,
            &self.open_questions,
        )
    }
}

/// Compress a round output into a context block within `budget_tokens`.
///
/// Sections are dropped in a fixed order when over budget: open questions
/// first, then findings trimmed down to one (the last finding is kept even
/// if it alone still overflows), then relationships, then modules.
pub fn compress_round(
    round_number: u8,
    output: &RoundOutput,
    budget_tokens: usize,
    estimator: impl Fn(&str) -> usize,
) -> RoundContext {
    let mut modules: Vec<ModuleSummary> = output.modules().into_iter().cloned().collect();
    let mut findings: Vec<Finding> = output.findings().to_vec();
    let mut relationships: Vec<Relationship> = output.relationships().to_vec();
    let mut open_questions: Vec<String> = output.open_questions().to_vec();

    let mut rendered = render_sections(
        round_number,
        &modules,
        &findings,
        &relationships,
        &open_questions,
    );
    let mut tokens = estimator(&rendered);

    if tokens > budget_tokens && !open_questions.is_empty() {
        open_questions.clear();
        rendered = render_sections(
            round_number,
            &modules,
            &findings,
            &relationships,
            &open_questions,
        );
        tokens = estimator(&rendered);
    }

    while tokens > budget_tokens && findings.len() > 1 {
        findings.pop();
        rendered = render_sections(
            round_number,
            &modules,
            &findings,
            &relationships,
            &open_questions,
        );
        tokens = estimator(&rendered);
    }

    if tokens > budget_tokens && !relationships.is_empty() {
        relationships.clear();
        rendered = render_sections(
            round_number,
            &modules,
            &findings,
            &relationships,
            &open_questions,
        );
        tokens = estimator(&rendered);
    }

    if tokens > budget_tokens && !modules.is_empty() {
        modules.clear();
        rendered = render_sections(
            round_number,
            &modules,
            &findings,
            &relationships,
            &open_questions,
        );
        tokens = estimator(&rendered);
    }

    RoundContext {
        round_number,
        modules,
        findings,
        relationships,
        open_questions,
        token_count: tokens,
    }
}

fn render_sections(
    round_number: u8,
    modules: &[ModuleSummary],
    findings: &[Finding],
    relationships: &[Relationship],
    open_questions: &[String],
) -> String {
    let mut out = format!("## Context from round {round_number}\n");

    if !modules.is_empty() {
        out.push_str("### Modules\n");
        for module in modules {
            out.push_str(&format!(
                "- {}: {} [{}]\n",
                module.name,
                module.purpose,
                module.files.join(", ")
            ));
        }
    }

    if !findings.is_empty() {
        out.push_str("### Findings\n");
        for finding in findings {
            out.push_str(&format!("- {}: {}\n", finding.title, finding.detail));
        }
    }

    if !relationships.is_empty() {
        out.push_str("### Relationships\n");
        for rel in relationships {
            out.push_str(&format!("- {} -{}-> {}\n", rel.from, rel.kind, rel.to));
        }
    }

    if !open_questions.is_empty() {
        out.push_str("### Open questions\n");
        for question in open_questions {
            out.push_str(&format!("- {question}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounds::outputs::ModulesOutput;

    fn chatty_output() -> RoundOutput {
        RoundOutput::Modules(ModulesOutput {
            modules: (0..5)
                .map(|i| ModuleSummary {
                    name: format!("module-{i}"),
                    purpose: "does a moderately involved thing".to_string(),
                    files: vec![format!("src/m{i}.rs")],
                    public_api: Vec::new(),
                })
                .collect(),
            findings: (0..5)
                .map(|i| Finding {
                    title: format!("finding {i}"),
                    detail: "a fairly long explanation of the observed behavior".to_string(),
                    files: Vec::new(),
                })
                .collect(),
            open_questions: vec!["why is the cache keyed this way?".to_string()],
        })
    }

    fn chars4(text: &str) -> usize {
        text.len() / 4
    }

    #[test]
    fn test_generous_budget_keeps_everything() {
        let ctx = compress_round(2, &chatty_output(), 100_000, chars4);
        assert_eq!(ctx.modules.len(), 5);
        assert_eq!(ctx.findings.len(), 5);
        assert_eq!(ctx.open_questions.len(), 1);
    }

    #[test]
    fn test_open_questions_trimmed_first() {
        let full = compress_round(2, &chatty_output(), 100_000, chars4);
        let tight = compress_round(2, &chatty_output(), full.token_count - 5, chars4);
        assert!(tight.open_questions.is_empty());
        assert!(!tight.modules.is_empty());
    }

    #[test]
    fn test_minimum_one_finding_survives() {
        // A budget of zero forces every trim; one finding must remain.
        let ctx = compress_round(2, &chatty_output(), 0, chars4);
        assert_eq!(ctx.findings.len(), 1);
        assert!(ctx.open_questions.is_empty());
        assert!(ctx.relationships.is_empty());
        assert!(ctx.modules.is_empty());
    }

    #[test]
    fn test_determinism() {
        let a = compress_round(2, &chatty_output(), 150, chars4);
        let b = compress_round(2, &chatty_output(), 150, chars4);
        assert_eq!(a.render(), b.render());
        assert_eq!(a.token_count, b.token_count);
    }
}
