//! Round execution: prompt build, provider call, validation, quality, and
//! the single grounding retry.
//!
//! Provider failures never abort the pipeline. A failed call degrades the
//! round to a schema-consistent empty result so downstream rounds and the
//! renderer keep working with whatever survived.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::analysis::snapshot::AnalysisSnapshot;
use crate::core::tokens::{TokenTracker, Usage};
use crate::packer::PackedContext;
use crate::provider::{
    retry_with_backoff, CompletionRequest, Provider, RateLimiter, RetryPolicy, TokenCallback,
};
use crate::rounds::compressor::RoundContext;
use crate::rounds::outputs::{
    module_detail_schema, round_schema, DeepDiveOutput, ModuleDetail, ModuleSummary, RoundOutput,
};
use crate::rounds::prompts::{
    build_module_prompt, build_round_prompt, GROUNDING_ADDENDUM, SYSTEM_PROMPT,
};
use crate::rounds::validator::validate_round_claims;
use crate::rounds::{round_name, QualityReport, RoundResult, RoundStatus, RoundValidation};

/// Claim drop rate above which a grounding retry fires.
const RETRY_DROP_RATE: f64 = 0.3;

/// Everything a round needs to execute.
pub struct RoundOptions {
    /// Round number, 1 through 6
    pub round_number: u8,
    /// Provider to call
    pub provider: Arc<dyn Provider>,
    /// Shared concurrency limiter
    pub limiter: Arc<RateLimiter>,
    /// Retry policy for transient provider failures
    pub retry: RetryPolicy,
    /// Packed repository context
    pub packed: Arc<PackedContext>,
    /// Compressed contexts of directly-consumed prior rounds
    pub prior_contexts: Vec<RoundContext>,
    /// Analysis snapshot for claim validation
    pub snapshot: Arc<AnalysisSnapshot>,
    /// Usage tracker
    pub tracker: Arc<TokenTracker>,
    /// Streaming token callback
    pub on_token: Option<TokenCallback>,
}

/// Execute one round end to end.
pub async fn execute_round(options: &RoundOptions) -> RoundResult {
    let first = attempt_round(options, false).await;

    match first {
        Attempt::Degraded(result) => result,
        Attempt::Completed(result) => {
            let needs_retry =
                result.validation.drop_rate > RETRY_DROP_RATE || !result.quality.is_acceptable;
            if !needs_retry {
                return result;
            }

            info!(
                "round {} ({}) weakly grounded (drop rate {:.2}), retrying once",
                options.round_number,
                round_name(options.round_number),
                result.validation.drop_rate
            );

            match attempt_round(options, true).await {
                Attempt::Completed(retried)
                    if retried.validation.drop_rate <= RETRY_DROP_RATE
                        && retried.quality.is_acceptable =>
                {
                    RoundResult {
                        status: RoundStatus::Retried,
                        ..retried
                    }
                }
                _ => {
                    // Keep the cleaned first attempt, quality flags intact.
                    RoundResult {
                        status: RoundStatus::Success,
                        ..result
                    }
                }
            }
        }
    }
}

enum Attempt {
    Completed(RoundResult),
    Degraded(RoundResult),
}

async fn attempt_round(options: &RoundOptions, is_retry: bool) -> Attempt {
    let start = Instant::now();
    let mut prompt = build_round_prompt(
        options.round_number,
        &options.packed,
        &options.prior_contexts,
    );
    if is_retry {
        prompt.push_str(GROUNDING_ADDENDUM);
    }

    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: prompt,
        response_schema: round_schema(options.round_number),
        temperature: Some(0.2),
        max_tokens: None,
        on_token: options.on_token.clone(),
    };

    let provider = options.provider.clone();
    let completion = options
        .limiter
        .with_limit(retry_with_backoff(options.retry, || {
            let provider = provider.clone();
            let request = request.clone();
            async move { provider.complete(request).await }
        }))
        .await;

    let completion = match completion {
        Ok(completion) => completion,
        Err(err) => {
            warn!(
                "round {} provider call failed, degrading: {}",
                options.round_number, err
            );
            return Attempt::Degraded(degraded_result(options, start));
        }
    };

    options
        .tracker
        .record_round(options.round_number, completion.usage.clone());

    let mut output = match RoundOutput::from_value(options.round_number, completion.data) {
        Ok(output) => output,
        Err(err) => {
            warn!(
                "round {} output failed typed parse, degrading: {}",
                options.round_number, err
            );
            return Attempt::Degraded(degraded_result(options, start));
        }
    };

    let validation = validate_round_claims(&mut output, &options.snapshot);
    let quality = quality_for_round(options.round_number, &output, &options.snapshot);

    debug!(
        "round {} validation: {}/{} claims kept ({} corrected)",
        options.round_number, validation.validated, validation.total, validation.corrected
    );

    Attempt::Completed(RoundResult {
        status: RoundStatus::Success,
        data: Some(output),
        usage: completion.usage,
        validation,
        quality,
    })
}

/// Structurally valid empty result for a failed round. Repeating the same
/// failure yields the same result.
fn degraded_result(options: &RoundOptions, start: Instant) -> RoundResult {
    RoundResult {
        status: RoundStatus::Degraded,
        data: Some(RoundOutput::fallback(options.round_number)),
        usage: Usage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            model: options.provider.model().to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        validation: RoundValidation::default(),
        quality: QualityReport {
            is_acceptable: false,
            reasons: vec!["provider call failed".to_string()],
        },
    }
}

/// Round-specific quality rubric.
pub fn quality_for_round(
    round: u8,
    output: &RoundOutput,
    snapshot: &AnalysisSnapshot,
) -> QualityReport {
    let mut reasons = Vec::new();
    let total_files = snapshot.file_tree.total_files;

    match output {
        RoundOutput::Architecture(o) => {
            if o.summary.len() < 200 {
                reasons.push("architecture summary under 200 characters".to_string());
            }
            if o.layers.is_empty() {
                reasons.push("no architectural layers identified".to_string());
            }
            if o.entry_points.is_empty() {
                reasons.push("no entry points identified".to_string());
            }
        }
        RoundOutput::Modules(o) => {
            if o.modules.is_empty() {
                reasons.push("no modules identified".to_string());
            }
            let cited: std::collections::BTreeSet<&String> =
                o.modules.iter().flat_map(|m| m.files.iter()).collect();
            if cited.len() < total_files.min(3) {
                reasons.push(format!(
                    "modules cite only {} of {} files",
                    cited.len(),
                    total_files
                ));
            }
        }
        RoundOutput::DataFlow(o) => {
            if o.summary.len() < 100 {
                reasons.push("data-flow summary under 100 characters".to_string());
            }
            if o.relationships.is_empty() {
                reasons.push("no data relationships identified".to_string());
            }
        }
        RoundOutput::Interfaces(o) => {
            if o.interfaces.is_empty() {
                reasons.push("no interfaces identified".to_string());
            }
        }
        RoundOutput::DeepDive(o) => {
            if o.module_details.iter().all(|d| d.is_none()) {
                reasons.push("every module deep dive is empty".to_string());
            }
        }
        RoundOutput::Guidance(o) => {
            if o.onboarding_steps.len() < 3 {
                reasons.push("fewer than 3 onboarding steps".to_string());
            }
        }
    }

    QualityReport {
        is_acceptable: reasons.is_empty(),
        reasons,
    }
}

/// Execute round 5's per-module fan-out.
///
/// One sub-query runs per module from round 2, all concurrently under the
/// shared limiter, joined with all-settled semantics: a failed sub-query
/// logs and leaves its slot empty.
pub async fn execute_deep_dive_round(
    options: &RoundOptions,
    modules: &[ModuleSummary],
) -> RoundResult {
    if modules.is_empty() {
        debug!("deep-dive round has no modules to expand, returning empty output");
        return RoundResult {
            status: RoundStatus::Success,
            data: Some(RoundOutput::DeepDive(DeepDiveOutput::default())),
            usage: Usage {
                model: options.provider.model().to_string(),
                ..Default::default()
            },
            validation: RoundValidation::default(),
            quality: quality_for_round(
                5,
                &RoundOutput::DeepDive(DeepDiveOutput::default()),
                &options.snapshot,
            ),
        };
    }

    let sub_queries = modules.iter().map(|module| {
        let provider = options.provider.clone();
        let limiter = options.limiter.clone();
        let retry = options.retry;
        let request = CompletionRequest {
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: build_module_prompt(module, &options.packed, &options.prior_contexts),
            response_schema: module_detail_schema(),
            temperature: Some(0.2),
            max_tokens: None,
            on_token: options.on_token.clone(),
        };
        let name = module.name.clone();

        async move {
            let result = limiter
                .with_limit(retry_with_backoff(retry, || {
                    let provider = provider.clone();
                    let request = request.clone();
                    async move { provider.complete(request).await }
                }))
                .await;
            (name, result)
        }
    });

    let settled = join_all(sub_queries).await;

    let mut details: Vec<Option<ModuleDetail>> = Vec::with_capacity(settled.len());
    let mut usages: Vec<Usage> = Vec::new();
    for (name, result) in settled {
        match result {
            Ok(completion) => {
                usages.push(completion.usage.clone());
                options.tracker.record_round(5, completion.usage);
                match serde_json::from_value::<ModuleDetail>(completion.data) {
                    Ok(detail) => details.push(Some(detail)),
                    Err(err) => {
                        warn!("deep dive for module '{}' failed to parse: {}", name, err);
                        details.push(None);
                    }
                }
            }
            Err(err) => {
                warn!("deep dive for module '{}' failed: {}", name, err);
                details.push(None);
            }
        }
    }

    let mut output = RoundOutput::DeepDive(DeepDiveOutput {
        module_details: details,
        findings: Vec::new(),
        open_questions: Vec::new(),
    });
    let validation = validate_round_claims(&mut output, &options.snapshot);
    let quality = quality_for_round(5, &output, &options.snapshot);

    // The representative usage row for display is the first sub-call.
    let usage = usages.into_iter().next().unwrap_or(Usage {
        model: options.provider.model().to_string(),
        ..Default::default()
    });

    let any_succeeded = match &output {
        RoundOutput::DeepDive(o) => o.module_details.iter().any(|d| d.is_some()),
        _ => false,
    };

    RoundResult {
        status: if any_succeeded {
            RoundStatus::Success
        } else {
            RoundStatus::Degraded
        },
        data: Some(output),
        usage,
        validation,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::snapshot::{EntryKind, FileEntry};
    use crate::core::errors::HandoverError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Provider that replays a scripted sequence of responses.
    struct ScriptedProvider {
        responses: Mutex<Vec<crate::core::errors::Result<serde_json::Value>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<crate::core::errors::Result<serde_json::Value>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> crate::core::errors::Result<crate::provider::Completion> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(HandoverError::provider_schema("script exhausted"));
            }
            responses.remove(0).map(|data| crate::provider::Completion {
                data,
                usage: Usage {
                    input_tokens: 100,
                    output_tokens: 50,
                    cache_read_tokens: None,
                    cache_creation_tokens: None,
                    model: "test-model".to_string(),
                    duration_ms: 5,
                },
            })
        }
    }

    fn snapshot() -> Arc<AnalysisSnapshot> {
        let mut snapshot = AnalysisSnapshot::default();
        snapshot.file_tree.directory_tree = vec![FileEntry {
            path: "src/main.rs".to_string(),
            kind: EntryKind::File,
            size: 20,
            lines: 2,
        }];
        snapshot.file_tree.total_files = 1;
        Arc::new(snapshot)
    }

    fn options(provider: Arc<dyn Provider>, round: u8) -> RoundOptions {
        RoundOptions {
            round_number: round,
            provider,
            limiter: Arc::new(RateLimiter::new(4)),
            retry: RetryPolicy {
                max_retries: 0,
                base_delay_ms: 1,
            },
            packed: Arc::new(PackedContext::default()),
            prior_contexts: Vec::new(),
            snapshot: snapshot(),
            tracker: Arc::new(TokenTracker::new()),
            on_token: None,
        }
    }

    fn good_modules_response() -> serde_json::Value {
        json!({
            "modules": [
                {"name": "core", "purpose": "entry", "files": ["src/main.rs"]}
            ]
        })
    }

    #[tokio::test]
    async fn test_successful_round_records_usage() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(good_modules_response())]));
        let opts = options(provider.clone(), 2);

        let result = execute_round(&opts).await;
        assert_eq!(result.status, RoundStatus::Success);
        assert_eq!(opts.tracker.round_usage(2).len(), 1);
        assert_eq!(opts.tracker.round_usage(2)[0].input_tokens, 100);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(HandoverError::provider_schema("nope")),
            Err(HandoverError::provider_schema("nope")),
        ]));
        let opts = options(provider, 2);

        let result = execute_round(&opts).await;
        assert_eq!(result.status, RoundStatus::Degraded);
        assert!(!result.quality.is_acceptable);
        assert_eq!(result.data, Some(RoundOutput::fallback(2)));
        assert_eq!(result.validation, RoundValidation::default());
    }

    #[tokio::test]
    async fn test_degraded_results_are_idempotent() {
        let failing = || {
            Arc::new(ScriptedProvider::new(vec![Err(
                HandoverError::provider_schema("nope"),
            )]))
        };
        let a = execute_round(&options(failing(), 3)).await;
        let b = execute_round(&options(failing(), 3)).await;
        assert_eq!(a.data, b.data);
        assert_eq!(a.status, b.status);
    }

    #[tokio::test]
    async fn test_high_drop_rate_triggers_one_retry() {
        // First response cites mostly phantom files; retry is clean.
        let hallucinated = json!({
            "modules": [{
                "name": "core",
                "purpose": "entry",
                "files": ["src/main.rs", "src/phantom1.rs", "src/phantom2.rs", "src/phantom3.rs"]
            }]
        });
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(hallucinated),
            Ok(good_modules_response()),
        ]));
        let opts = options(provider.clone(), 2);

        let result = execute_round(&opts).await;
        assert_eq!(result.status, RoundStatus::Retried);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_repeated_weak_grounding_keeps_first_attempt() {
        let hallucinated = || {
            json!({
                "modules": [{
                    "name": "core",
                    "purpose": "entry",
                    "files": ["src/main.rs", "src/p1.rs", "src/p2.rs", "src/p3.rs"]
                }]
            })
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(hallucinated()),
            Ok(hallucinated()),
        ]));
        let opts = options(provider.clone(), 2);

        let result = execute_round(&opts).await;
        assert_eq!(result.status, RoundStatus::Success);
        assert_eq!(provider.call_count(), 2);
        // Cleaned first attempt: phantom paths dropped.
        let RoundOutput::Modules(modules) = result.data.unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(modules.modules[0].files, vec!["src/main.rs".to_string()]);
    }

    #[tokio::test]
    async fn test_deep_dive_all_settled() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(json!({"name": "core", "summary": "the core"})),
            Err(HandoverError::provider_schema("nope")),
        ]));
        let opts = options(provider, 5);
        let modules = vec![
            ModuleSummary {
                name: "core".to_string(),
                purpose: "entry".to_string(),
                files: vec!["src/main.rs".to_string()],
                public_api: Vec::new(),
            },
            ModuleSummary {
                name: "extras".to_string(),
                purpose: "misc".to_string(),
                files: Vec::new(),
                public_api: Vec::new(),
            },
        ];

        let result = execute_deep_dive_round(&opts, &modules).await;
        let RoundOutput::DeepDive(dive) = result.data.unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(dive.module_details.len(), 2);
        assert_eq!(
            dive.module_details.iter().filter(|d| d.is_some()).count(),
            1
        );
        assert_eq!(result.status, RoundStatus::Success);
    }
}
