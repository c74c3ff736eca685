//! End-to-end pipeline scenarios against a scripted provider.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use handover_rs::core::config::HandoverConfig;
use handover_rs::core::errors::{HandoverError, Result};
use handover_rs::core::tokens::Usage;
use handover_rs::pipeline::display::RoundDisplayStatus;
use handover_rs::pipeline::{run_pipeline, PipelineOptions};
use handover_rs::provider::{Completion, CompletionRequest, Provider};

/// Provider that answers every round with a canned, well-grounded response
/// and counts its calls.
struct StubProvider {
    calls: AtomicUsize,
    fail: bool,
}

impl StubProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response_for(prompt: &str) -> serde_json::Value {
        if prompt.starts_with("# Module deep dive:") {
            return json!({
                "name": "core",
                "summary": "Implements the binary entry point and shared helpers.",
                "keyFiles": ["src/main.rs"],
                "gotchas": ["main swallows broken-pipe errors on purpose"]
            });
        }

        let round: u8 = prompt
            .strip_prefix("# Documentation round ")
            .and_then(|rest| rest.split(':').next())
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(1);

        match round {
            1 => json!({
                "summary": "A single-binary Rust tool with a thin entry point in main.rs, a \
                            library layer in lib.rs, and shared helpers in util.rs. Control \
                            flows from the command line into the library entry function and \
                            back out through standard output, with no long-lived state held \
                            anywhere between invocations of the binary.",
                "layers": [
                    {"name": "entry", "purpose": "process startup", "files": ["src/main.rs"]},
                    {"name": "library", "purpose": "core behavior", "files": ["src/lib.rs", "src/util.rs"]}
                ],
                "entryPoints": ["src/main.rs"]
            }),
            2 => json!({
                "modules": [
                    {"name": "core", "purpose": "library behavior and helpers",
                     "files": ["src/lib.rs", "src/util.rs", "src/main.rs"],
                     "publicApi": ["run"]}
                ]
            }),
            3 => json!({
                "summary": "Configuration flows from main into the library entry function, \
                            which threads a context struct through the helpers in util.rs.",
                "relationships": [
                    {"from": "entry", "to": "core", "kind": "calls"}
                ]
            }),
            4 => json!({
                "interfaces": [
                    {"name": "cli", "kind": "cli", "file": "src/main.rs",
                     "description": "single-command binary"}
                ]
            }),
            _ => json!({
                "onboardingSteps": [
                    "Read src/main.rs to see startup",
                    "Read src/lib.rs for the core flow",
                    "Skim src/util.rs for the helpers"
                ]
            }),
        }
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "stub-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HandoverError::provider_schema("scripted failure"));
        }
        Ok(Completion {
            data: Self::response_for(&request.user_prompt),
            usage: Usage {
                input_tokens: 1_000,
                output_tokens: 200,
                cache_read_tokens: None,
                cache_creation_tokens: None,
                model: "stub-model".to_string(),
                duration_ms: 3,
            },
        })
    }
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn seed_repo(dir: &Path) {
    write(dir, "src/main.rs", "fn main() {\n    handover_demo::run(true);\n}\n");
    write(dir, "src/lib.rs", "pub fn run(flag: bool) {\n    let _ = flag;\n}\n");
    write(dir, "src/util.rs", "pub fn helper() -> u32 {\n    7\n}\n");
}

fn options(dir: &Path, provider: Arc<StubProvider>) -> PipelineOptions {
    let provider: Arc<dyn Provider> = provider;
    let mut config = HandoverConfig::default();
    config.provider = "anthropic".to_string();
    PipelineOptions {
        repo_root: dir.to_path_buf(),
        config,
        cache_reads_enabled: true,
        only_rounds: None,
        provider_override: Some(provider),
    }
}

#[tokio::test]
async fn empty_repository_short_circuits() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "README.md", "# Docs only\n");

    let provider = StubProvider::new();
    let outcome = run_pipeline(options(dir.path(), provider.clone()))
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 0);
    assert!(outcome.display.is_empty_repo());
    assert_eq!(outcome.documents.len(), 2);
    assert_eq!(outcome.documents[0].filename, "00-INDEX.md");
    assert_eq!(outcome.documents[1].filename, "01-PROJECT-OVERVIEW.md");
    assert!(outcome.documents[1].content.contains("empty"));
    assert!(outcome.first_failure().is_none());
}

#[tokio::test]
async fn second_run_is_a_pure_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    let first = StubProvider::new();
    run_pipeline(options(dir.path(), first.clone())).await.unwrap();
    // 5 regular rounds plus one deep-dive sub-query for the single module.
    assert_eq!(first.call_count(), 6);

    let second = StubProvider::new();
    let outcome = run_pipeline(options(dir.path(), second.clone()))
        .await
        .unwrap();

    assert_eq!(second.call_count(), 0);
    assert!(outcome.display.all_rounds_cached());
    assert!(outcome
        .display
        .rounds()
        .values()
        .all(|r| r.status == RoundDisplayStatus::Cached));
    assert_eq!(outcome.documents.len(), 8);
}

#[tokio::test]
async fn same_size_edit_invalidates_the_cascade() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    let first = StubProvider::new();
    run_pipeline(options(dir.path(), first.clone())).await.unwrap();

    // Same byte length, different content.
    write(
        dir.path(),
        "src/main.rs",
        &std::fs::read_to_string(dir.path().join("src/main.rs"))
            .unwrap()
            .replace("true", "fals"),
    );

    let second = StubProvider::new();
    let outcome = run_pipeline(options(dir.path(), second.clone()))
        .await
        .unwrap();

    // Every round re-ran because the analysis fingerprint changed.
    assert_eq!(second.call_count(), 6);
    assert!(outcome.display.is_incremental());
    assert!(!outcome.display.all_rounds_cached());
}

#[tokio::test]
async fn no_cache_gates_reads_but_keeps_writes() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    let first = StubProvider::new();
    let mut opts = options(dir.path(), first.clone());
    opts.cache_reads_enabled = false;
    run_pipeline(opts).await.unwrap();
    assert_eq!(first.call_count(), 6);

    // Reads were off, but the writes landed: the next normal run hits.
    let second = StubProvider::new();
    let outcome = run_pipeline(options(dir.path(), second.clone()))
        .await
        .unwrap();
    assert_eq!(second.call_count(), 0);
    assert!(outcome.display.all_rounds_cached());
}

#[tokio::test]
async fn failing_provider_degrades_but_still_renders() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    let provider = StubProvider::failing();
    let outcome = run_pipeline(options(dir.path(), provider)).await.unwrap();

    assert!(outcome.first_failure().is_none());
    assert_eq!(outcome.documents.len(), 8);
    // Rounds with provider calls degrade; the deep-dive round has no
    // modules to expand and settles with an empty output instead.
    let rounds = outcome.display.rounds();
    for round in [1, 2, 3, 4, 6] {
        assert_eq!(rounds[&round].status, RoundDisplayStatus::Failed);
    }

    // Degraded results are never written to cache; a healthy provider on
    // the next run executes every round.
    let healthy = StubProvider::new();
    run_pipeline(options(dir.path(), healthy.clone())).await.unwrap();
    assert_eq!(healthy.call_count(), 6);
}

#[tokio::test]
async fn only_filter_limits_provider_calls() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    let provider = StubProvider::new();
    let mut opts = options(dir.path(), provider.clone());
    opts.only_rounds = Some(BTreeSet::from([1, 2]));
    let outcome = run_pipeline(opts).await.unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(outcome.documents.len(), 8);
}

#[tokio::test]
async fn gitignore_covers_cache_after_first_run() {
    let dir = tempfile::tempdir().unwrap();
    seed_repo(dir.path());

    run_pipeline(options(dir.path(), StubProvider::new()))
        .await
        .unwrap();

    let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
    assert!(gitignore.lines().any(|l| l.trim() == ".handover/"));
}
