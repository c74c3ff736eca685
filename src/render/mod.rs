//! Markdown document rendering from accumulated round outputs.
//!
//! Renderers are registered per output document and consume the analysis
//! snapshot plus whatever round outputs survived the run. A round that
//! degraded simply contributes empty sections; the document set is always
//! produced. An empty repository short-circuits to a two-document
//! placeholder set.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::analysis::snapshot::AnalysisSnapshot;
use crate::core::config::Audience;
use crate::core::errors::{HandoverError, Result};
use crate::rounds::outputs::RoundOutput;

/// Everything renderers read.
pub struct RenderContext {
    /// Analysis snapshot of the repository
    pub snapshot: Arc<AnalysisSnapshot>,
    /// Round outputs keyed by round number; degraded rounds present but empty
    pub rounds: BTreeMap<u8, Arc<RoundOutput>>,
    /// Target audience, passed through from configuration
    pub audience: Audience,
    /// Render timestamp
    pub generated_at: DateTime<Utc>,
}

/// One rendered output document.
#[derive(Debug, Clone)]
pub struct RenderedDoc {
    /// File name, e.g. `00-INDEX.md`
    pub filename: String,
    /// Document title
    pub title: String,
    /// Markdown body
    pub content: String,
}

/// Renderer registry entry.
type RendererFn = fn(&RenderContext) -> RenderedDoc;

/// The registered document set, in output order.
fn registry() -> Vec<RendererFn> {
    vec![
        render_overview,
        render_architecture,
        render_modules,
        render_data_flow,
        render_interfaces,
        render_deep_dives,
        render_onboarding,
    ]
}

/// Render the full document set for a run.
///
/// The index is rendered last so it reflects exactly the documents that
/// exist, but is emitted first in the returned list.
pub fn render_documents(context: &RenderContext) -> Vec<RenderedDoc> {
    if context.snapshot.is_empty_repo() {
        return render_empty_repo(context);
    }

    let mut docs: Vec<RenderedDoc> = registry().iter().map(|render| render(context)).collect();
    let index = render_index(context, &docs);
    docs.insert(0, index);
    docs
}

/// Write rendered documents into the output directory.
pub fn write_documents(output_dir: &Path, docs: &[RenderedDoc]) -> Result<()> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        HandoverError::io(
            format!("Failed to create output directory: {}", output_dir.display()),
            e,
        )
    })?;

    for doc in docs {
        let path = output_dir.join(&doc.filename);
        std::fs::write(&path, &doc.content).map_err(|e| {
            HandoverError::io(format!("Failed to write document: {}", path.display()), e)
        })?;
    }

    info!("wrote {} documents to {}", docs.len(), output_dir.display());
    Ok(())
}

fn header(title: &str, context: &RenderContext) -> String {
    format!(
        "# {title}\n\n> Generated {} for `{}`\n\n",
        context.generated_at.format("%Y-%m-%d %H:%M UTC"),
        context.snapshot.metadata.root_dir
    )
}

/// Placeholder documents for a repository with no source files.
fn render_empty_repo(context: &RenderContext) -> Vec<RenderedDoc> {
    let overview_body = format!(
        "{}This repository appears to be empty: the analysis found no source \
         files.\n\nPossible reasons:\n\n\
         - the directory only contains documentation or configuration\n\
         - every source file is excluded by `include`/`exclude` patterns\n\
         - sources live in a subdirectory that was not analyzed\n\
         - the checkout is incomplete\n\n\
         Adjust the patterns in `handover.yml` or point the tool at the \
         directory that holds the code, then re-run.\n",
        header("Project overview", context)
    );

    let index_body = format!(
        "{}The repository is empty, so only this index and the overview were \
         generated.\n\n- [Project overview](01-PROJECT-OVERVIEW.md)\n",
        header("Documentation index", context)
    );

    vec![
        RenderedDoc {
            filename: "00-INDEX.md".to_string(),
            title: "Documentation index".to_string(),
            content: index_body,
        },
        RenderedDoc {
            filename: "01-PROJECT-OVERVIEW.md".to_string(),
            title: "Project overview".to_string(),
            content: overview_body,
        },
    ]
}

fn render_index(context: &RenderContext, docs: &[RenderedDoc]) -> RenderedDoc {
    let mut body = header("Documentation index", context);
    body.push_str("| Document | Contents |\n| --- | --- |\n");
    for doc in docs {
        body.push_str(&format!("| [{}]({}) | {} |\n", doc.title, doc.filename, doc.title));
    }
    RenderedDoc {
        filename: "00-INDEX.md".to_string(),
        title: "Documentation index".to_string(),
        content: body,
    }
}

fn render_overview(context: &RenderContext) -> RenderedDoc {
    let snapshot = &context.snapshot;
    let mut body = header("Project overview", context);

    body.push_str(&format!(
        "{} source files across {} extensions, {} bytes total.\n\n",
        snapshot.file_tree.total_files,
        snapshot.file_tree.files_by_extension.len(),
        snapshot.file_tree.total_size
    ));

    if let Some(RoundOutput::Architecture(arch)) = context.rounds.get(&1).map(|r| r.as_ref()) {
        if !arch.summary.is_empty() {
            body.push_str(&arch.summary);
            body.push_str("\n\n");
        }
    }

    body.push_str("## Files by extension\n\n");
    for (ext, count) in &snapshot.file_tree.files_by_extension {
        body.push_str(&format!("- `.{ext}`: {count}\n"));
    }

    if !snapshot.manifests.is_empty() {
        body.push_str("\n## Dependency manifests\n\n");
        for manifest in &snapshot.manifests {
            body.push_str(&format!("- `{}` ({})\n", manifest.path, manifest.kind));
        }
    }

    if !snapshot.todos.is_empty() {
        body.push_str(&format!("\n{} TODO markers found in the source.\n", snapshot.todos.len()));
    }

    RenderedDoc {
        filename: "01-PROJECT-OVERVIEW.md".to_string(),
        title: "Project overview".to_string(),
        content: body,
    }
}

fn render_architecture(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Architecture", context);

    if let Some(RoundOutput::Architecture(arch)) = context.rounds.get(&1).map(|r| r.as_ref()) {
        body.push_str(&arch.summary);
        body.push_str("\n\n");

        if !arch.layers.is_empty() {
            body.push_str("## Layers\n\n");
            for layer in &arch.layers {
                body.push_str(&format!("### {}\n\n{}\n\n", layer.name, layer.purpose));
                for file in &layer.files {
                    body.push_str(&format!("- `{file}`\n"));
                }
                body.push('\n');
            }
        }

        if !arch.entry_points.is_empty() {
            body.push_str("## Entry points\n\n");
            for entry in &arch.entry_points {
                body.push_str(&format!("- `{entry}`\n"));
            }
        }

        append_findings(&mut body, arch.findings.iter());
    } else {
        body.push_str("No architecture analysis is available for this run.\n");
    }

    RenderedDoc {
        filename: "02-ARCHITECTURE.md".to_string(),
        title: "Architecture".to_string(),
        content: body,
    }
}

fn render_modules(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Modules", context);

    if let Some(RoundOutput::Modules(modules)) = context.rounds.get(&2).map(|r| r.as_ref()) {
        for module in &modules.modules {
            body.push_str(&format!("## {}\n\n{}\n\n", module.name, module.purpose));
            if !module.files.is_empty() {
                body.push_str("Files:\n");
                for file in &module.files {
                    body.push_str(&format!("- `{file}`\n"));
                }
                body.push('\n');
            }
            if !module.public_api.is_empty() {
                body.push_str(&format!("Public API: {}\n\n", module.public_api.join(", ")));
            }
        }
        append_findings(&mut body, modules.findings.iter());
    } else {
        body.push_str("No module inventory is available for this run.\n");
    }

    RenderedDoc {
        filename: "03-MODULES.md".to_string(),
        title: "Modules".to_string(),
        content: body,
    }
}

fn render_data_flow(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Data flow", context);

    if let Some(RoundOutput::DataFlow(flow)) = context.rounds.get(&3).map(|r| r.as_ref()) {
        body.push_str(&flow.summary);
        body.push_str("\n\n");

        if !flow.relationships.is_empty() {
            body.push_str("## Relationships\n\n");
            for rel in &flow.relationships {
                body.push_str(&format!("- `{}` {} `{}`\n", rel.from, rel.kind, rel.to));
            }
        }
        append_findings(&mut body, flow.findings.iter());
    } else {
        body.push_str("No data-flow analysis is available for this run.\n");
    }

    RenderedDoc {
        filename: "04-DATA-FLOW.md".to_string(),
        title: "Data flow".to_string(),
        content: body,
    }
}

fn render_interfaces(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Interfaces", context);

    if let Some(RoundOutput::Interfaces(interfaces)) = context.rounds.get(&4).map(|r| r.as_ref()) {
        for interface in &interfaces.interfaces {
            body.push_str(&format!(
                "## {} ({})\n\nDefined in `{}`.\n\n{}\n\n",
                interface.name, interface.kind, interface.file, interface.description
            ));
        }
        append_findings(&mut body, interfaces.findings.iter());
    } else {
        body.push_str("No interface catalog is available for this run.\n");
    }

    RenderedDoc {
        filename: "05-INTERFACES.md".to_string(),
        title: "Interfaces".to_string(),
        content: body,
    }
}

fn render_deep_dives(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Module deep dives", context);

    if let Some(RoundOutput::DeepDive(dive)) = context.rounds.get(&5).map(|r| r.as_ref()) {
        for detail in dive.module_details.iter().flatten() {
            body.push_str(&format!("## {}\n\n{}\n\n", detail.name, detail.summary));
            if !detail.key_files.is_empty() {
                body.push_str("Read first:\n");
                for file in &detail.key_files {
                    body.push_str(&format!("- `{file}`\n"));
                }
                body.push('\n');
            }
            for gotcha in &detail.gotchas {
                body.push_str(&format!("> {gotcha}\n\n"));
            }
        }

        let missing = dive.module_details.iter().filter(|d| d.is_none()).count();
        if missing > 0 {
            body.push_str(&format!(
                "{missing} module deep dives could not be generated this run.\n"
            ));
        }
    } else {
        body.push_str("No deep dives are available for this run.\n");
    }

    RenderedDoc {
        filename: "06-MODULE-DEEP-DIVES.md".to_string(),
        title: "Module deep dives".to_string(),
        content: body,
    }
}

fn render_onboarding(context: &RenderContext) -> RenderedDoc {
    let mut body = header("Onboarding guide", context);

    if let Some(RoundOutput::Guidance(guidance)) = context.rounds.get(&6).map(|r| r.as_ref()) {
        if !guidance.onboarding_steps.is_empty() {
            body.push_str("## Suggested reading order\n\n");
            for (i, step) in guidance.onboarding_steps.iter().enumerate() {
                body.push_str(&format!("{}. {step}\n", i + 1));
            }
            body.push('\n');
        }
        append_findings(&mut body, guidance.findings.iter());
        if !guidance.open_questions.is_empty() {
            body.push_str("## Questions for the original authors\n\n");
            for question in &guidance.open_questions {
                body.push_str(&format!("- {question}\n"));
            }
        }
    } else {
        body.push_str("No onboarding guidance is available for this run.\n");
    }

    RenderedDoc {
        filename: "07-ONBOARDING.md".to_string(),
        title: "Onboarding guide".to_string(),
        content: body,
    }
}

fn append_findings<'a>(
    body: &mut String,
    findings: impl Iterator<Item = &'a crate::rounds::outputs::Finding>,
) {
    let findings: Vec<_> = findings.collect();
    if findings.is_empty() {
        return;
    }
    body.push_str("\n## Notable observations\n\n");
    for finding in findings {
        body.push_str(&format!("- **{}** {}", finding.title, finding.detail));
        if !finding.files.is_empty() {
            body.push_str(&format!(
                " ({})",
                finding
                    .files
                    .iter()
                    .map(|f| format!("`{f}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        body.push('\n');
    }
    body.push('\n');
}
