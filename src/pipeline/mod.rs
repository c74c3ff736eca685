//! Pipeline assembly: the step graph that turns a repository into
//! documents.
//!
//! Nine steps register with the orchestrator: static analysis, context
//! packing, the six AI rounds wired per their cache dependencies, and the
//! render step joining on all rounds. Round wrappers add the cache consult,
//! the shared round-result map, and display-state publication around the
//! round runner.

pub mod display;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::analysis::hashing::analysis_fingerprint;
use crate::analysis::incremental::AnalysisCache;
use crate::analysis::scan::{scan_repository, ScanOutput};
use crate::cache::{result_hash, round_hash, RoundCache};
use crate::core::config::HandoverConfig;
use crate::core::errors::{HandoverError, Result};
use crate::core::tokens::TokenTracker;
use crate::orchestrator::{Orchestrator, StepData, StepDefinition, StepResult, StepStatus};
use crate::packer::{ContextPacker, PackedContext, PackingBudget};
use crate::provider::{provider_for_config, Provider, RateLimiter, RetryPolicy};
use crate::render::{render_documents, write_documents, RenderContext, RenderedDoc};
use crate::rounds::outputs::{ModuleSummary, RoundOutput};
use crate::rounds::runner::{execute_deep_dive_round, execute_round, RoundOptions};
use crate::rounds::{prior_rounds, round_name, RoundStatus, ROUND_COUNT};
use display::{DisplayState, RoundDisplayStatus};

/// Options for one pipeline run.
pub struct PipelineOptions {
    /// Repository to analyze
    pub repo_root: PathBuf,
    /// Merged configuration
    pub config: HandoverConfig,
    /// Whether cache lookups are enabled (`--no-cache` turns them off;
    /// writes always happen)
    pub cache_reads_enabled: bool,
    /// When set, only the listed rounds call the provider; the rest
    /// short-circuit to empty outputs
    pub only_rounds: Option<BTreeSet<u8>>,
    /// Provider override, used by tests and the estimate command
    pub provider_override: Option<Arc<dyn Provider>>,
}

impl PipelineOptions {
    /// Standard options for a repository and configuration.
    pub fn new(repo_root: PathBuf, config: HandoverConfig) -> Self {
        Self {
            repo_root,
            config,
            cache_reads_enabled: true,
            only_rounds: None,
            provider_override: None,
        }
    }
}

/// Everything a caller sees after a run.
pub struct PipelineOutcome {
    /// Unique identifier of this run, for logs and reports
    pub run_id: String,
    /// Per-step results from the orchestrator
    pub step_results: BTreeMap<String, StepResult>,
    /// Rendered documents (also written to the output directory)
    pub documents: Vec<RenderedDoc>,
    /// Display state as the run left it
    pub display: Arc<DisplayState>,
    /// Usage tracker with per-round records
    pub tracker: Arc<TokenTracker>,
    /// Whether a cache version migration wiped the cache this run
    pub migration_notice: bool,
}

impl PipelineOutcome {
    /// First step failure, when any step failed.
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.step_results
            .values()
            .filter(|r| r.status == StepStatus::Failed)
            .min_by_key(|r| r.settled_order)
    }
}

/// Per-round record in the shared result map.
#[derive(Clone)]
struct RoundRecord {
    output: Arc<RoundOutput>,
    /// Hash of the output, consumed by downstream round hashes
    hash: String,
    from_cache: bool,
    duration_ms: u64,
}

/// State shared by the step closures.
struct Shared {
    repo_root: PathBuf,
    config: HandoverConfig,
    provider: Option<Arc<dyn Provider>>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    cache: RoundCache,
    tracker: Arc<TokenTracker>,
    display: Arc<DisplayState>,
    only_rounds: Option<BTreeSet<u8>>,
    scan: RwLock<Option<Arc<ScanOutput>>>,
    packed: RwLock<Arc<PackedContext>>,
    fingerprint: RwLock<String>,
    rounds: RwLock<BTreeMap<u8, RoundRecord>>,
    documents: RwLock<Vec<RenderedDoc>>,
}

impl Shared {
    fn scan(&self) -> Result<Arc<ScanOutput>> {
        self.scan
            .read()
            .clone()
            .ok_or_else(|| HandoverError::internal("static analysis did not run"))
    }

    fn model_name(&self) -> String {
        self.provider
            .as_ref()
            .map(|p| p.model().to_string())
            .unwrap_or_else(|| self.config.model.clone())
    }

    fn record_round(&self, round: u8, output: RoundOutput, from_cache: bool, duration_ms: u64) {
        let hash = result_hash(&output);
        self.rounds.write().insert(
            round,
            RoundRecord {
                output: Arc::new(output),
                hash,
                from_cache,
                duration_ms,
            },
        );
    }
}

/// Run the full documentation pipeline for a repository.
pub async fn run_pipeline(options: PipelineOptions) -> Result<PipelineOutcome> {
    options.config.validate()?;

    let run_id = uuid::Uuid::new_v4().to_string();
    info!(
        "starting documentation run {} for {}",
        run_id,
        options.repo_root.display()
    );

    let static_only = options.config.analysis.static_only;
    let provider = match (&options.provider_override, static_only) {
        (Some(provider), _) => Some(provider.clone()),
        (None, true) => None,
        (None, false) => Some(provider_for_config(&options.config)?),
    };

    let display = DisplayState::new();
    display.set_local(options.config.is_local_provider());

    let shared = Arc::new(Shared {
        limiter: Arc::new(RateLimiter::new(options.config.effective_concurrency())),
        retry: RetryPolicy::default(),
        cache: RoundCache::open(&options.repo_root, options.cache_reads_enabled),
        tracker: Arc::new(TokenTracker::new()),
        display: display.clone(),
        provider,
        only_rounds: options.only_rounds,
        scan: RwLock::new(None),
        packed: RwLock::new(Arc::new(PackedContext::default())),
        fingerprint: RwLock::new(String::new()),
        rounds: RwLock::new(BTreeMap::new()),
        documents: RwLock::new(Vec::new()),
        repo_root: options.repo_root,
        config: options.config,
    });

    let mut orchestrator = Orchestrator::new();
    register_steps(&mut orchestrator, &shared)?;

    let ticker = display::spawn_ticker(display.clone());
    let step_results = orchestrator.execute().await;
    ticker.abort();
    let step_results = step_results?;

    publish_parallel_savings(&shared);

    let documents = shared.documents.read().clone();
    let outcome = PipelineOutcome {
        run_id,
        step_results,
        documents,
        display,
        tracker: shared.tracker.clone(),
        migration_notice: shared.cache.take_migration_notice(),
    };
    Ok(outcome)
}

fn register_steps(orchestrator: &mut Orchestrator, shared: &Arc<Shared>) -> Result<()> {
    // 1. Static analysis.
    {
        let shared = shared.clone();
        orchestrator.add_step(StepDefinition::new(
            "static-analysis",
            "Static analysis",
            &[],
            move || {
                let shared = shared.clone();
                async move {
                    let scan = scan_repository(&shared.repo_root, &shared.config)?;
                    shared.display.set_empty_repo(scan.snapshot.is_empty_repo());
                    *shared.scan.write() = Some(Arc::new(scan));
                    Ok(unit())
                }
            },
        ))?;
    }

    // 2. Context packing and incremental state.
    {
        let shared = shared.clone();
        orchestrator.add_step(StepDefinition::new(
            "pack-context",
            "Pack context",
            &["static-analysis"],
            move || {
                let shared = shared.clone();
                async move {
                    let scan = shared.scan()?;
                    let analysis_cache = AnalysisCache::load(&shared.cache.cache_dir());
                    let changed = analysis_cache.changed_files(&scan.hashes);
                    let is_incremental = analysis_cache.is_incremental(&scan.hashes);

                    let mut scored = scan.scored_files.clone();
                    for file in &mut scored {
                        file.changed = changed.contains(&file.path);
                    }

                    let mut budget = PackingBudget::default();
                    if let Some(max) = shared.config.context_window.max_tokens {
                        budget.max_tokens = max;
                    }
                    let pinned: BTreeSet<String> =
                        shared.config.context_window.pin.iter().cloned().collect();

                    let packed = ContextPacker::new(budget).pack(
                        &scored,
                        &changed,
                        &pinned,
                        &scan.snapshot.ast,
                    );

                    info!(
                        "packed {} files ({} skipped), {} tokens",
                        packed.metadata.analyzed_count,
                        packed.metadata.ignored_count,
                        packed.total_tokens
                    );

                    shared.display.set_file_coverage(packed.coverage());
                    shared.display.set_incremental(is_incremental);
                    *shared.fingerprint.write() = analysis_fingerprint(&scan.hashes);
                    *shared.packed.write() = Arc::new(packed);

                    if let Err(err) = analysis_cache.save(&scan.hashes) {
                        warn!("failed to persist analysis cache: {err}");
                    }
                    Ok(unit())
                }
            },
        ))?;
    }

    // 3. The six rounds, wired per their cache dependencies.
    for round in 1..=ROUND_COUNT {
        let deps: Vec<String> = if round == 1 {
            vec!["pack-context".to_string()]
        } else {
            prior_rounds(round)
                .iter()
                .map(|p| format!("round-{p}"))
                .collect()
        };
        let dep_refs: Vec<&str> = deps.iter().map(|s| s.as_str()).collect();

        let shared = shared.clone();
        orchestrator.add_step(StepDefinition::new(
            &format!("round-{round}"),
            &format!("Round {round}: {}", round_name(round)),
            &dep_refs,
            move || {
                let shared = shared.clone();
                async move { run_round_step(shared, round).await }
            },
        ))?;
    }

    // 4. Render, joining on every round.
    {
        let round_deps: Vec<String> = (1..=ROUND_COUNT).map(|r| format!("round-{r}")).collect();
        let dep_refs: Vec<&str> = round_deps.iter().map(|s| s.as_str()).collect();

        let shared = shared.clone();
        orchestrator.add_step(StepDefinition::new(
            "render",
            "Render documents",
            &dep_refs,
            move || {
                let shared = shared.clone();
                async move {
                    let scan = shared.scan()?;
                    let rounds: BTreeMap<u8, Arc<RoundOutput>> = shared
                        .rounds
                        .read()
                        .iter()
                        .map(|(round, record)| (*round, record.output.clone()))
                        .collect();

                    let context = RenderContext {
                        snapshot: Arc::new(scan.snapshot.clone()),
                        rounds,
                        audience: shared.config.audience,
                        generated_at: Utc::now(),
                    };

                    let docs = render_documents(&context);
                    let output_dir = if shared.config.output.is_absolute() {
                        shared.config.output.clone()
                    } else {
                        shared.repo_root.join(&shared.config.output)
                    };
                    write_documents(&output_dir, &docs)?;

                    shared.display.set_completion_docs(docs.len());
                    *shared.documents.write() = docs;
                    Ok(unit())
                }
            },
        ))?;
    }

    Ok(())
}

/// The wrapper around one AI round: empty-repo short-circuit, cache
/// consult, execution, cache store, and display publication.
async fn run_round_step(shared: Arc<Shared>, round: u8) -> Result<StepData> {
    let scan = shared.scan()?;
    if scan.snapshot.is_empty_repo() {
        debug!("round {round} short-circuited: empty repository");
        return Ok(unit());
    }

    let model = shared.model_name();
    let fingerprint = shared.fingerprint.read().clone();
    let prior_hashes: Vec<String> = {
        let rounds = shared.rounds.read();
        prior_rounds(round)
            .iter()
            .filter_map(|p| rounds.get(p).map(|r| r.hash.clone()))
            .collect()
    };
    let hash = round_hash(round, &model, &fingerprint, &prior_hashes);

    let skipped_by_filter = shared
        .only_rounds
        .as_ref()
        .is_some_and(|only| !only.contains(&round));
    if shared.provider.is_none() || skipped_by_filter {
        shared.record_round(round, RoundOutput::fallback(round), false, 0);
        shared.display.round_finished(
            round,
            round_name(round),
            RoundDisplayStatus::Done,
            None,
            None,
        );
        return Ok(unit());
    }

    if let Some(cached) = shared.cache.get(round, &hash) {
        info!("round {round} ({}) served from cache", round_name(round));
        shared.record_round(round, cached, true, 0);
        shared.display.round_finished(
            round,
            round_name(round),
            RoundDisplayStatus::Cached,
            None,
            None,
        );
        return Ok(unit());
    }

    shared.display.round_started(round, round_name(round));

    let on_token: crate::provider::TokenCallback = {
        let display = shared.display.clone();
        Arc::new(move |tokens: u64| display.round_streaming(round, tokens))
    };

    let options = RoundOptions {
        round_number: round,
        provider: shared
            .provider
            .clone()
            .ok_or_else(|| HandoverError::internal("no provider for round"))?,
        limiter: shared.limiter.clone(),
        retry: shared.retry,
        packed: shared.packed.read().clone(),
        prior_contexts: build_prior_contexts(&shared, round),
        snapshot: Arc::new(scan.snapshot.clone()),
        tracker: shared.tracker.clone(),
        on_token: Some(on_token),
    };

    let result = if round == 5 {
        let modules = round_two_modules(&shared);
        execute_deep_dive_round(&options, &modules).await
    } else {
        execute_round(&options).await
    };

    let output = result
        .data
        .clone()
        .unwrap_or_else(|| RoundOutput::fallback(round));

    if matches!(result.status, RoundStatus::Success | RoundStatus::Retried) {
        if let Err(err) = shared.cache.set(round, &hash, &output, &model) {
            warn!("failed to cache round {round}: {err}");
        }
    }

    let savings = shared
        .tracker
        .round_cache_savings(round)
        .map(|s| s.tokens_saved);
    let status = match result.status {
        RoundStatus::Success | RoundStatus::Retried => RoundDisplayStatus::Done,
        RoundStatus::Degraded | RoundStatus::Failed => RoundDisplayStatus::Failed,
    };
    shared.display.round_finished(
        round,
        round_name(round),
        status,
        Some(result.usage.output_tokens),
        savings,
    );

    shared.record_round(round, output, false, result.usage.duration_ms);
    Ok(unit())
}

/// Compressed contexts of the rounds this round directly consumes.
fn build_prior_contexts(shared: &Shared, round: u8) -> Vec<crate::rounds::RoundContext> {
    const CONTEXT_BUDGET_TOKENS: usize = 2_000;

    let rounds = shared.rounds.read();
    prior_rounds(round)
        .iter()
        .filter_map(|p| rounds.get(p))
        .map(|record| {
            crate::rounds::compress_round(
                record.output.round_number(),
                &record.output,
                CONTEXT_BUDGET_TOKENS,
                crate::core::tokens::estimate_tokens,
            )
        })
        .collect()
}

/// Modules discovered by round 2, for the deep-dive fan-out.
fn round_two_modules(shared: &Shared) -> Vec<ModuleSummary> {
    shared
        .rounds
        .read()
        .get(&2)
        .map(|record| record.output.modules().into_iter().cloned().collect())
        .unwrap_or_default()
}

/// Publish wall time saved by running rounds in parallel: the sum of round
/// durations minus the critical path through the round wiring.
fn publish_parallel_savings(shared: &Shared) {
    let rounds = shared.rounds.read();
    if rounds.is_empty() || rounds.values().all(|r| r.from_cache) {
        return;
    }

    let duration =
        |round: u8| -> i64 { rounds.get(&round).map(|r| r.duration_ms as i64).unwrap_or(0) };

    let mut critical: BTreeMap<u8, i64> = BTreeMap::new();
    for round in 1..=ROUND_COUNT {
        let upstream = prior_rounds(round)
            .iter()
            .map(|p| critical.get(p).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        critical.insert(round, upstream + duration(round));
    }

    let total: i64 = (1..=ROUND_COUNT).map(duration).sum();
    let critical_path = critical.values().copied().max().unwrap_or(0);
    shared.display.set_parallel_saved(total - critical_path);
}

fn unit() -> StepData {
    Arc::new(())
}
