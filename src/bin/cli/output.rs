//! Terminal output helpers for the handover CLI.

use console::style;
use handover_rs::core::errors::HandoverError;
use handover_rs::pipeline::display::{DisplayState, RoundDisplayStatus};
use handover_rs::pipeline::PipelineOutcome;

/// Print a surfaced error as a message / reason / fix triplet.
pub fn print_error(err: &HandoverError) {
    eprintln!("{} {}", style("error:").red().bold(), err);
    eprintln!("  {} {}", style("reason:").dim(), err.reason());
    eprintln!("  {} {}", style("fix:").dim(), err.fix());
}

/// Print the end-of-run summary.
pub fn print_run_summary(outcome: &PipelineOutcome) {
    let display = &outcome.display;

    if outcome.migration_notice {
        println!(
            "{} cache format changed; previous round results were cleared",
            style("note:").yellow()
        );
    }

    if display.is_empty_repo() {
        println!(
            "{} repository contains no source files; placeholder documents written",
            style("!").yellow()
        );
        return;
    }

    if display.all_rounds_cached() {
        println!("{} All 6 rounds cached", style("✓").green());
    } else {
        print_round_lines(display);
    }

    if display.is_incremental() {
        println!("  incremental run ({}% file coverage)", coverage_pct(display));
    } else {
        println!("  full run ({}% file coverage)", coverage_pct(display));
    }

    if let Some(saved_ms) = display.parallel_saved_ms() {
        println!("  parallel execution saved {:.1}s", saved_ms as f64 / 1000.0);
    }

    let cost = outcome.tracker.total_cost();
    if cost > 0.0 {
        println!("  estimated cost ${cost:.4}");
    }

    println!(
        "{} {} documents written",
        style("✓").green(),
        display.completion_docs()
    );
}

fn print_round_lines(display: &DisplayState) {
    for (round, entry) in display.rounds() {
        let (mark, label) = match entry.status {
            RoundDisplayStatus::Done => (style("✓").green(), "done"),
            RoundDisplayStatus::Cached => (style("●").cyan(), "cached"),
            RoundDisplayStatus::Failed => (style("✗").red(), "degraded"),
            RoundDisplayStatus::Running => (style("…").dim(), "running"),
        };
        let tokens = entry
            .tokens
            .map(|t| format!(" {t} tokens"))
            .unwrap_or_default();
        let savings = entry
            .cache_savings_tokens
            .map(|t| format!(" ({t} cached)"))
            .unwrap_or_default();
        println!(
            "  {mark} round {round} {} {label}{tokens}{savings} [{:.1}s]",
            entry.name,
            entry.elapsed_ms as f64 / 1000.0
        );
    }
}

fn coverage_pct(display: &DisplayState) -> u32 {
    (display.file_coverage() * 100.0).round() as u32
}

/// Print a cost estimate table for one model.
pub fn print_estimate(model: &str, packed_tokens: usize, estimated_cost: f64, warn_above: Option<f64>) {
    println!("model: {model}");
    println!("packed context: ~{packed_tokens} tokens");
    println!(
        "estimated cost for 6 rounds: {}",
        style(format!("${estimated_cost:.4}")).bold()
    );
    if let Some(threshold) = warn_above {
        if estimated_cost > threshold {
            println!(
                "{} estimate exceeds the configured cost warning threshold (${threshold:.2})",
                style("warning:").yellow()
            );
        }
    }
}
