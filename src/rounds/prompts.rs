//! Prompt construction for the six documentation rounds.
//!
//! Every prompt carries the packed repository context, the compressed
//! context of directly-consumed prior rounds, and a strict JSON-only
//! response instruction tied to the round's schema.

use crate::packer::PackedContext;
use crate::rounds::compressor::RoundContext;
use crate::rounds::outputs::ModuleSummary;
use crate::rounds::round_name;

/// System prompt shared by every round.
pub const SYSTEM_PROMPT: &str = "You are a senior engineer writing handover \
documentation for a codebase you have just read. Ground every statement in \
the files provided; never invent paths, symbols, or behavior. Respond with \
a single JSON object matching the requested schema and nothing else.";

/// Addendum appended when a round is retried after weak grounding.
pub const GROUNDING_ADDENDUM: &str = "\n\n## Correction\nYour previous answer \
referenced files or imports that do not exist in the provided context. Use \
only paths that appear verbatim in the file blocks above, and only imports \
visible in those files.";

/// Build the user prompt for a round.
pub fn build_round_prompt(
    round: u8,
    packed: &PackedContext,
    prior_contexts: &[RoundContext],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Documentation round {round}: {}\n\n## Repository files\n",
        round_name(round)
    ));
    prompt.push_str(&packed.as_prompt_block());

    for context in prior_contexts {
        prompt.push('\n');
        prompt.push_str(&context.render());
    }

    prompt.push_str("\n## Task\n");
    prompt.push_str(round_task(round));
    prompt.push_str(
        "\n\n## Response format\nRespond with valid JSON only, matching the \
         schema supplied with this request. No markdown fences, no prose \
         outside the JSON object.\n",
    );

    prompt
}

/// Build the prompt for one module sub-query inside the deep-dive round.
pub fn build_module_prompt(
    module: &ModuleSummary,
    packed: &PackedContext,
    prior_contexts: &[RoundContext],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# Module deep dive: {}\n\n## Repository files\n",
        module.name
    ));

    // Restrict the context to the module's own files plus signatures of the
    // rest so the sub-query stays focused.
    for file in &packed.files {
        if module.files.contains(&file.path) {
            prompt.push_str(&format!(
                "<file path=\"{}\">\n{}\n</file>\n",
                file.path, file.content
            ));
        }
    }

    for context in prior_contexts {
        prompt.push('\n');
        prompt.push_str(&context.render());
    }

    prompt.push_str(&format!(
        "\n## Task\nDescribe the '{}' module in depth: what it does, which \
         files to read first, and the invariants or sharp edges a new \
         contributor must know. Stated purpose: {}\n\n## Response format\n\
         Respond with valid JSON only, matching the schema supplied with \
         this request.\n",
        module.name, module.purpose
    ));

    prompt
}

fn round_task(round: u8) -> &'static str {
    match round {
        1 => "Survey the system architecture. Identify the layers, their \
              responsibilities, the entry points, and how control flows \
              between layers. Report notable observations and questions \
              later rounds should resolve.",
        2 => "Inventory the modules of this codebase. For each module name \
              its purpose, member files, and public API surface. Favor the \
              boundaries the code itself draws (directories, packages, \
              visibility).",
        3 => "Trace how data moves through the system: the central data \
              structures, who produces and consumes them, and the import \
              relationships that carry them. Back relationships with \
              concrete imports.",
        4 => "Catalog the public interfaces: command-line surfaces, HTTP \
              endpoints, configuration files, and library entry points. \
              Connect each interface to the modules that implement it.",
        5 => "Write a deep dive for each module listed in the prior-round \
              context, covering internals the inventory round could only \
              name.",
        _ => "Write onboarding guidance: the order a new contributor should \
              read the code, the risky areas to touch carefully, and the \
              questions only the original authors can answer.",
    }
}
