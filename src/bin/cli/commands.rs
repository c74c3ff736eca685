//! Command implementations for the handover CLI.

use std::collections::BTreeSet;
use std::path::Path;

use console::style;
use tracing::debug;

use handover_rs::analysis::incremental::AnalysisCache;
use handover_rs::analysis::scan_repository;
use handover_rs::cache::RoundCache;
use handover_rs::core::config::HandoverConfig;
use handover_rs::core::errors::{HandoverError, Result};
use handover_rs::core::tokens::{pricing_for, TokenTracker, Usage};
use handover_rs::packer::{ContextPacker, PackingBudget};
use handover_rs::pipeline::{run_pipeline, PipelineOptions};
use handover_rs::rounds::ROUND_COUNT;

use super::args::{AnalyzeArgs, EstimateArgs, GenerateArgs, InitConfigArgs, ValidateConfigArgs};
use super::output;

/// Run the full documentation pipeline.
pub async fn generate_command(args: GenerateArgs) -> Result<()> {
    let repo_root = canonical(&args.path)?;
    let mut config = HandoverConfig::load(&repo_root)?;

    // Flag overrides sit on top of env and YAML.
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(audience) = args.audience {
        config.audience = audience.into();
    }
    if let Some(output) = args.output {
        config.output = output;
    }
    if args.static_only {
        config.analysis.static_only = true;
    }
    config.validate()?;

    let only_rounds = parse_only_rounds(&args.only)?;

    let options = PipelineOptions {
        repo_root,
        config,
        cache_reads_enabled: !args.no_cache,
        only_rounds,
        provider_override: None,
    };

    let spinner = indicatif::ProgressBar::new_spinner();
    spinner.set_message("generating documentation");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let outcome = run_pipeline(options).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    output::print_run_summary(&outcome);

    if let Some(failure) = outcome.first_failure() {
        return Err(HandoverError::internal(format!(
            "step '{}' failed: {}",
            failure.step_id,
            failure.error.as_deref().unwrap_or("unknown error")
        )));
    }
    Ok(())
}

/// Run static analysis alone and report what a generate run would see.
pub async fn analyze_command(args: AnalyzeArgs) -> Result<()> {
    let repo_root = canonical(&args.path)?;
    let config = HandoverConfig::load(&repo_root)?;
    let scan = scan_repository(&repo_root, &config)?;

    println!(
        "{} {} source files, {} bytes",
        style("✓").green(),
        scan.snapshot.file_tree.total_files,
        scan.snapshot.file_tree.total_size
    );
    for (ext, count) in &scan.snapshot.file_tree.files_by_extension {
        println!("  .{ext}: {count}");
    }
    if !scan.snapshot.todos.is_empty() {
        println!("  {} TODO markers", scan.snapshot.todos.len());
    }
    println!("  {} test files", scan.snapshot.testing.test_file_count);

    let cache = RoundCache::open(&repo_root, true);
    let analysis_cache = AnalysisCache::load(&cache.cache_dir());
    let changed = analysis_cache.changed_files(&scan.hashes);
    if analysis_cache.has_previous() {
        println!(
            "  {} files changed since the previous run",
            if changed.is_empty() {
                "no".to_string()
            } else {
                changed.len().to_string()
            }
        );
    } else {
        println!("  no previous run recorded");
    }

    Ok(())
}

/// Estimate what a generate run would cost.
pub async fn estimate_command(args: EstimateArgs) -> Result<()> {
    let repo_root = canonical(&args.path)?;
    let mut config = HandoverConfig::load(&repo_root)?;
    if let Some(model) = args.model {
        config.model = model;
    }

    let scan = scan_repository(&repo_root, &config)?;
    let mut budget = PackingBudget::default();
    if let Some(max) = config.context_window.max_tokens {
        budget.max_tokens = max;
    }
    let packed = ContextPacker::new(budget).pack(
        &scan.scored_files,
        &Default::default(),
        &Default::default(),
        &scan.snapshot.ast,
    );

    // Each round replays the packed context; output is a rough fixed share.
    let per_round_output = 4_000u64;
    let estimated_cost: f64 = (1..=ROUND_COUNT)
        .map(|_| {
            TokenTracker::cost_of(&Usage {
                input_tokens: packed.total_tokens as u64,
                output_tokens: per_round_output,
                cache_read_tokens: None,
                cache_creation_tokens: None,
                model: config.model.clone(),
                duration_ms: 0,
            })
        })
        .sum();

    debug!(
        "pricing model {} at {:?}",
        config.model,
        pricing_for(&config.model)
    );
    output::print_estimate(
        &config.model,
        packed.total_tokens,
        estimated_cost,
        config.cost_warning_threshold,
    );
    Ok(())
}

/// Print the default configuration as YAML.
pub async fn print_default_config() -> Result<()> {
    let config = HandoverConfig::default();
    print!("{}", serde_yaml::to_string(&config).map_err(HandoverError::from)?);
    Ok(())
}

/// Write a default configuration file.
pub async fn init_config(args: InitConfigArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        return Err(HandoverError::config(format!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        )));
    }
    HandoverConfig::default().to_yaml_file(&args.path)?;
    println!("{} wrote {}", style("✓").green(), args.path.display());
    Ok(())
}

/// Validate a configuration file and report problems.
pub async fn validate_config(args: ValidateConfigArgs) -> Result<()> {
    let config = HandoverConfig::from_yaml_file(&args.path)?;
    config.validate()?;
    println!("{} {} is valid", style("✓").green(), args.path.display());
    Ok(())
}

fn canonical(path: &Path) -> Result<std::path::PathBuf> {
    path.canonicalize()
        .map_err(|e| HandoverError::io(format!("cannot resolve path: {}", path.display()), e))
}

/// Parse `--only` values: bare round numbers or `round-N` ids.
fn parse_only_rounds(values: &[String]) -> Result<Option<BTreeSet<u8>>> {
    if values.is_empty() {
        return Ok(None);
    }

    let mut rounds = BTreeSet::new();
    for value in values {
        let digits = value.trim().trim_start_matches("round-");
        let round: u8 = digits.parse().map_err(|_| {
            HandoverError::validation(format!("invalid --only value '{value}' (expected 1-6)"))
        })?;
        if !(1..=ROUND_COUNT).contains(&round) {
            return Err(HandoverError::validation(format!(
                "--only round {round} is out of range (expected 1-6)"
            )));
        }
        rounds.insert(round);
    }
    Ok(Some(rounds))
}
