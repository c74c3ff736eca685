//! Reactive dependency-graph orchestrator.
//!
//! Steps register with their dependencies and run as soon as every
//! dependency completes; independent steps run concurrently. A failed step
//! never aborts the run: its dependents are skipped transitively while
//! unrelated branches keep going. Graph validation (unknown dependencies,
//! cycles) happens before any step starts.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::errors::{HandoverError, Result};

/// Opaque value a step hands to its dependents through the results map.
pub type StepData = Arc<dyn Any + Send + Sync>;

/// Future returned by a step's execute function.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<StepData>> + Send>>;

/// A step registered with the orchestrator.
pub struct StepDefinition {
    /// Unique step id
    pub id: String,
    /// Human-readable name for hooks and logs
    pub name: String,
    /// Ids of steps that must complete first
    pub deps: Vec<String>,
    /// The step body; called at most once
    pub execute: Box<dyn Fn() -> StepFuture + Send + Sync>,
    /// Called when the step is skipped instead of run
    pub on_skip: Option<Box<dyn Fn() + Send + Sync>>,
}

impl StepDefinition {
    /// Convenience constructor for a step with no skip callback.
    pub fn new<F, Fut>(id: &str, name: &str, deps: &[&str], execute: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepData>> + Send + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            execute: Box::new(move || Box::pin(execute())),
            on_skip: None,
        }
    }

    /// Attach a skip callback.
    pub fn with_on_skip(mut self, on_skip: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_skip = Some(Box::new(on_skip));
        self
    }
}

/// Terminal status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// The step ran and returned a value
    Completed,
    /// The step ran and returned an error
    Failed,
    /// The step never ran because an upstream step failed or was skipped
    Skipped,
}

/// Result of one step after the run.
#[derive(Clone)]
pub struct StepResult {
    /// Step id
    pub step_id: String,
    /// Terminal status
    pub status: StepStatus,
    /// Wall time between start and settlement (zero for skipped steps)
    pub duration: Duration,
    /// Value returned on completion
    pub data: Option<StepData>,
    /// Error text on failure
    pub error: Option<String>,
    /// Settlement order across the run, starting at 0
    pub settled_order: u64,
}

impl std::fmt::Debug for StepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepResult")
            .field("step_id", &self.step_id)
            .field("status", &self.status)
            .field("duration", &self.duration)
            .field("error", &self.error)
            .field("settled_order", &self.settled_order)
            .finish()
    }
}

/// Optional hooks observing step transitions. Hook panics are contained and
/// never alter step outcomes.
#[derive(Default)]
pub struct ExecutionHooks {
    /// Fired when a step starts running
    pub on_step_start: Option<Box<dyn Fn(&str, &str) + Send + Sync>>,
    /// Fired when a step completes
    pub on_step_complete: Option<Box<dyn Fn(&StepResult) + Send + Sync>>,
    /// Fired when a step fails
    pub on_step_fail: Option<Box<dyn Fn(&StepResult) + Send + Sync>>,
}

/// Dependency-graph step orchestrator.
#[derive(Default)]
pub struct Orchestrator {
    steps: Vec<StepDefinition>,
    hooks: ExecutionHooks,
}

impl Orchestrator {
    /// Create an empty orchestrator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the execution hooks.
    pub fn with_hooks(mut self, hooks: ExecutionHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register a step. Fails synchronously when the id is already taken.
    pub fn add_step(&mut self, step: StepDefinition) -> Result<()> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(HandoverError::DuplicateStep { step_id: step.id });
        }
        self.steps.push(step);
        Ok(())
    }

    /// Validate the graph: every dependency must exist and the graph must
    /// be acyclic. Runs before any step starts.
    fn validate(&self) -> Result<()> {
        let ids: std::collections::BTreeSet<&str> =
            self.steps.iter().map(|s| s.id.as_str()).collect();

        for step in &self.steps {
            for dep in &step.deps {
                if !ids.contains(dep.as_str()) {
                    return Err(HandoverError::MissingDependency {
                        step_id: step.id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm: whatever survives the topological pass with a
        // non-zero in-degree participates in a cycle.
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.deps.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.deps {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;

        while let Some(id) = queue.pop_front() {
            visited += 1;
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree.get_mut(dependent).expect("known id");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if visited < self.steps.len() {
            let mut participants: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, d)| *d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            participants.sort();
            return Err(HandoverError::CyclicDependency { participants });
        }

        Ok(())
    }

    /// Run the graph to completion and return a result for every step.
    pub async fn execute(&self) -> Result<BTreeMap<String, StepResult>> {
        self.validate()?;

        let total = self.steps.len();
        let mut results: BTreeMap<String, StepResult> = BTreeMap::new();
        if total == 0 {
            return Ok(results);
        }

        let index_of: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut in_degree: Vec<usize> = self.steps.iter().map(|s| s.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); total];
        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.deps {
                dependents[index_of[dep.as_str()]].push(i);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum State {
            Pending,
            Running,
            Terminal,
        }
        let mut states = vec![State::Pending; total];
        let mut sequence = 0u64;

        let (tx, mut rx) =
            mpsc::unbounded_channel::<(usize, std::result::Result<StepData, String>, Duration)>();

        let start_step = |idx: usize, states: &mut Vec<State>| {
            states[idx] = State::Running;
            let step = &self.steps[idx];
            debug!("starting step '{}'", step.id);
            self.fire_start(&step.id, &step.name);

            let future = (step.execute)();
            let tx = tx.clone();
            tokio::spawn(async move {
                use futures::FutureExt;
                let started = Instant::now();
                let outcome = match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(data)) => Ok(data),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err("step panicked".to_string()),
                };
                let _ = tx.send((idx, outcome, started.elapsed()));
            });
        };

        // Every zero-degree step starts immediately; the rest start the
        // moment their last dependency settles.
        for idx in 0..total {
            if in_degree[idx] == 0 {
                start_step(idx, &mut states);
            }
        }

        let mut terminal = 0usize;
        while terminal < total {
            let (idx, outcome, duration) = rx
                .recv()
                .await
                .ok_or_else(|| HandoverError::internal("orchestrator channel closed"))?;

            let step = &self.steps[idx];
            states[idx] = State::Terminal;
            terminal += 1;

            let result = match outcome {
                Ok(data) => StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Completed,
                    duration,
                    data: Some(data),
                    error: None,
                    settled_order: sequence,
                },
                Err(error) => StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Failed,
                    duration,
                    data: None,
                    error: Some(error),
                    settled_order: sequence,
                },
            };
            sequence += 1;

            match result.status {
                StepStatus::Completed => self.fire_complete(&result),
                _ => self.fire_fail(&result),
            }

            let failed = result.status == StepStatus::Failed;
            results.insert(step.id.clone(), result);

            if failed {
                // Transitive skip: everything reachable from the failed
                // step settles as skipped right now.
                let mut queue: VecDeque<usize> = dependents[idx].iter().copied().collect();
                while let Some(dep_idx) = queue.pop_front() {
                    if states[dep_idx] != State::Pending {
                        continue;
                    }
                    states[dep_idx] = State::Terminal;
                    terminal += 1;

                    let dep_step = &self.steps[dep_idx];
                    debug!("skipping step '{}' (upstream failure)", dep_step.id);
                    if let Some(on_skip) = &dep_step.on_skip {
                        let _ = std::panic::catch_unwind(AssertUnwindSafe(on_skip));
                    }

                    results.insert(
                        dep_step.id.clone(),
                        StepResult {
                            step_id: dep_step.id.clone(),
                            status: StepStatus::Skipped,
                            duration: Duration::ZERO,
                            data: None,
                            error: None,
                            settled_order: sequence,
                        },
                    );
                    sequence += 1;
                    queue.extend(dependents[dep_idx].iter().copied());
                }
            } else {
                for &dep_idx in &dependents[idx] {
                    in_degree[dep_idx] = in_degree[dep_idx].saturating_sub(1);
                    if in_degree[dep_idx] == 0 && states[dep_idx] == State::Pending {
                        start_step(dep_idx, &mut states);
                    }
                }
            }
        }

        Ok(results)
    }

    fn fire_start(&self, id: &str, name: &str) {
        if let Some(hook) = &self.hooks.on_step_start {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(id, name))).is_err() {
                warn!("on_step_start hook panicked for '{id}'");
            }
        }
    }

    fn fire_complete(&self, result: &StepResult) {
        if let Some(hook) = &self.hooks.on_step_complete {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(result))).is_err() {
                warn!("on_step_complete hook panicked for '{}'", result.step_id);
            }
        }
    }

    fn fire_fail(&self, result: &StepResult) {
        if let Some(hook) = &self.hooks.on_step_fail {
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(result))).is_err() {
                warn!("on_step_fail hook panicked for '{}'", result.step_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn value(n: u32) -> StepData {
        Arc::new(n)
    }

    fn ok_step(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(id, id, deps, || async { Ok(value(1)) })
    }

    fn failing_step(id: &str, deps: &[&str]) -> StepDefinition {
        StepDefinition::new(id, id, deps, || async {
            Err(HandoverError::internal("boom"))
        })
    }

    #[test]
    fn test_duplicate_id_rejected_synchronously() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.add_step(ok_step("a", &[])).unwrap();
        let err = orchestrator.add_step(ok_step("a", &[])).unwrap_err();
        assert!(matches!(err, HandoverError::DuplicateStep { .. }));
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_before_execution() {
        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = started.clone();

        let mut orchestrator = Orchestrator::new();
        orchestrator
            .add_step(StepDefinition::new("a", "a", &["ghost"], move || {
                let started = started_clone.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    Ok(value(1))
                }
            }))
            .unwrap();

        let err = orchestrator.execute().await.unwrap_err();
        assert!(matches!(err, HandoverError::MissingDependency { .. }));
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_detected_before_execution() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.add_step(ok_step("a", &["b"])).unwrap();
        orchestrator.add_step(ok_step("b", &["a"])).unwrap();
        orchestrator.add_step(ok_step("c", &[])).unwrap();

        let err = orchestrator.execute().await.unwrap_err();
        match err {
            HandoverError::CyclicDependency { participants } => {
                assert_eq!(participants, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dependents_settle_after_dependencies() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.add_step(ok_step("a", &[])).unwrap();
        orchestrator.add_step(ok_step("b", &["a"])).unwrap();
        orchestrator.add_step(ok_step("c", &["a", "b"])).unwrap();

        let results = orchestrator.execute().await.unwrap();
        assert!(results["a"].settled_order < results["b"].settled_order);
        assert!(results["b"].settled_order < results["c"].settled_order);
        assert!(results.values().all(|r| r.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_fan_out_failure_skips_join_but_not_siblings() {
        // A -> B, A -> C, B + C -> D; B fails.
        let skip_count = Arc::new(AtomicUsize::new(0));
        let skip_clone = skip_count.clone();

        let mut orchestrator = Orchestrator::new();
        orchestrator.add_step(ok_step("a", &[])).unwrap();
        orchestrator.add_step(failing_step("b", &["a"])).unwrap();
        orchestrator.add_step(ok_step("c", &["a"])).unwrap();
        orchestrator
            .add_step(ok_step("d", &["b", "c"]).with_on_skip(move || {
                skip_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let results = orchestrator.execute().await.unwrap();
        assert_eq!(results["a"].status, StepStatus::Completed);
        assert_eq!(results["b"].status, StepStatus::Failed);
        assert_eq!(results["c"].status, StepStatus::Completed);
        assert_eq!(results["d"].status, StepStatus::Skipped);
        assert_eq!(results["d"].duration, Duration::ZERO);
        assert_eq!(skip_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transitive_skip_propagation() {
        let mut orchestrator = Orchestrator::new();
        orchestrator.add_step(failing_step("a", &[])).unwrap();
        orchestrator.add_step(ok_step("b", &["a"])).unwrap();
        orchestrator.add_step(ok_step("c", &["b"])).unwrap();
        orchestrator.add_step(ok_step("island", &[])).unwrap();

        let results = orchestrator.execute().await.unwrap();
        assert_eq!(results["b"].status, StepStatus::Skipped);
        assert_eq!(results["c"].status, StepStatus::Skipped);
        assert_eq!(results["island"].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_independent_steps_run_concurrently() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut orchestrator = Orchestrator::new();
        for id in ["x", "y", "z"] {
            let running = running.clone();
            let peak = peak.clone();
            orchestrator
                .add_step(StepDefinition::new(id, id, &[], move || {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(value(1))
                    }
                }))
                .unwrap();
        }

        orchestrator.execute().await.unwrap();
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_panicking_step_fails_and_skips_dependents() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .add_step(StepDefinition::new("p", "p", &[], || async {
                if true {
                    panic!("kaboom");
                }
                Ok(value(1))
            }))
            .unwrap();
        orchestrator.add_step(ok_step("q", &["p"])).unwrap();

        let results = orchestrator.execute().await.unwrap();
        assert_eq!(results["p"].status, StepStatus::Failed);
        assert_eq!(results["q"].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_hook_panic_does_not_affect_outcomes() {
        let mut orchestrator = Orchestrator::new().with_hooks(ExecutionHooks {
            on_step_start: Some(Box::new(|_, _| panic!("rowdy hook"))),
            on_step_complete: None,
            on_step_fail: None,
        });
        orchestrator.add_step(ok_step("a", &[])).unwrap();

        let results = orchestrator.execute().await.unwrap();
        assert_eq!(results["a"].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_step_data_flows_to_caller() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .add_step(StepDefinition::new("n", "n", &[], || async {
                Ok(Arc::new(42u32) as StepData)
            }))
            .unwrap();

        let results = orchestrator.execute().await.unwrap();
        let data = results["n"].data.as_ref().unwrap();
        assert_eq!(*data.downcast_ref::<u32>().unwrap(), 42);
    }
}
