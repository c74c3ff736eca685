//! Observable display state for terminal renderers.
//!
//! The pipeline mutates this state as steps progress; renderers only read
//! it. A ticker task refreshes the elapsed time of running rounds every
//! 80 ms so spinners move without streaming callbacks driving re-renders.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Refresh interval for the elapsed-time ticker.
pub const TICK_INTERVAL: Duration = Duration::from_millis(80);

/// Display status of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDisplayStatus {
    /// Round is executing
    Running,
    /// Round finished this run
    Done,
    /// Round was served from cache
    Cached,
    /// Round failed or degraded
    Failed,
}

/// Display entry for one round.
#[derive(Debug, Clone)]
pub struct RoundDisplay {
    /// Round name
    pub name: String,
    /// Current status
    pub status: RoundDisplayStatus,
    /// Output tokens once known
    pub tokens: Option<u64>,
    /// Prompt-cache tokens saved, when any
    pub cache_savings_tokens: Option<u64>,
    /// Running token count while streaming
    pub streaming_tokens: Option<u64>,
    /// When the round started, for elapsed-time ticking
    pub started_at: Option<Instant>,
    /// Elapsed wall time, refreshed by the ticker while running
    pub elapsed_ms: u64,
}

/// Snapshot of everything a renderer needs to draw progress.
#[derive(Debug, Default)]
pub struct DisplayState {
    inner: RwLock<DisplayInner>,
}

#[derive(Debug, Default)]
struct DisplayInner {
    rounds: BTreeMap<u8, RoundDisplay>,
    file_coverage: f64,
    completion_docs: usize,
    parallel_saved_ms: Option<u64>,
    is_incremental: bool,
    is_empty_repo: bool,
    is_local: bool,
    stream_visible: bool,
}

impl DisplayState {
    /// Create an empty display state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a round as running now.
    pub fn round_started(&self, round: u8, name: &str) {
        self.inner.write().rounds.insert(
            round,
            RoundDisplay {
                name: name.to_string(),
                status: RoundDisplayStatus::Running,
                tokens: None,
                cache_savings_tokens: None,
                streaming_tokens: None,
                started_at: Some(Instant::now()),
                elapsed_ms: 0,
            },
        );
    }

    /// Record a round's terminal status and token counts.
    pub fn round_finished(
        &self,
        round: u8,
        name: &str,
        status: RoundDisplayStatus,
        tokens: Option<u64>,
        cache_savings_tokens: Option<u64>,
    ) {
        let mut inner = self.inner.write();
        let elapsed_ms = inner
            .rounds
            .get(&round)
            .and_then(|r| r.started_at)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        inner.rounds.insert(
            round,
            RoundDisplay {
                name: name.to_string(),
                status,
                tokens,
                cache_savings_tokens,
                streaming_tokens: None,
                started_at: None,
                elapsed_ms,
            },
        );
    }

    /// Update the streaming token count of a running round.
    pub fn round_streaming(&self, round: u8, tokens: u64) {
        if let Some(entry) = self.inner.write().rounds.get_mut(&round) {
            entry.streaming_tokens = Some(tokens);
        }
    }

    /// Refresh elapsed time for every running round. Called by the ticker.
    pub fn tick(&self) {
        let mut inner = self.inner.write();
        for entry in inner.rounds.values_mut() {
            if let Some(started) = entry.started_at {
                entry.elapsed_ms = started.elapsed().as_millis() as u64;
            }
        }
    }

    /// Set the fraction of files included in the packed context.
    pub fn set_file_coverage(&self, coverage: f64) {
        self.inner.write().file_coverage = coverage;
    }

    /// Mark whether this run is incremental.
    pub fn set_incremental(&self, incremental: bool) {
        self.inner.write().is_incremental = incremental;
    }

    /// Mark whether the repository turned out to be empty.
    pub fn set_empty_repo(&self, empty: bool) {
        self.inner.write().is_empty_repo = empty;
    }

    /// Mark whether a local provider is serving the run.
    pub fn set_local(&self, local: bool) {
        self.inner.write().is_local = local;
    }

    /// Toggle streaming visibility for renderers.
    pub fn set_stream_visible(&self, visible: bool) {
        self.inner.write().stream_visible = visible;
    }

    /// Record how many documents the render step produced.
    pub fn set_completion_docs(&self, count: usize) {
        self.inner.write().completion_docs = count;
    }

    /// Record wall time saved by running rounds in parallel. Ignored when
    /// zero or negative so the display line is simply omitted.
    pub fn set_parallel_saved(&self, saved_ms: i64) {
        if saved_ms > 0 {
            self.inner.write().parallel_saved_ms = Some(saved_ms as u64);
        }
    }

    /// Read a consistent copy of the per-round entries.
    pub fn rounds(&self) -> BTreeMap<u8, RoundDisplay> {
        self.inner.read().rounds.clone()
    }

    /// Whether every tracked round resolved from cache.
    pub fn all_rounds_cached(&self) -> bool {
        let inner = self.inner.read();
        !inner.rounds.is_empty()
            && inner
                .rounds
                .values()
                .all(|r| r.status == RoundDisplayStatus::Cached)
    }

    /// Current file coverage fraction.
    pub fn file_coverage(&self) -> f64 {
        self.inner.read().file_coverage
    }

    /// Whether the run was incremental.
    pub fn is_incremental(&self) -> bool {
        self.inner.read().is_incremental
    }

    /// Whether the repository had no source files.
    pub fn is_empty_repo(&self) -> bool {
        self.inner.read().is_empty_repo
    }

    /// Documents produced by the render step.
    pub fn completion_docs(&self) -> usize {
        self.inner.read().completion_docs
    }

    /// Wall time saved by parallelism, when positive.
    pub fn parallel_saved_ms(&self) -> Option<u64> {
        self.inner.read().parallel_saved_ms
    }
}

/// Spawn the 80 ms ticker updating running rounds' elapsed time.
///
/// The returned handle stops ticking when aborted or when the state is
/// dropped by the rest of the pipeline.
pub fn spawn_ticker(state: Arc<DisplayState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            state.tick();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_lifecycle() {
        let state = DisplayState::new();
        state.round_started(1, "architecture");
        assert_eq!(state.rounds()[&1].status, RoundDisplayStatus::Running);

        state.round_finished(1, "architecture", RoundDisplayStatus::Done, Some(1200), None);
        let entry = &state.rounds()[&1];
        assert_eq!(entry.status, RoundDisplayStatus::Done);
        assert_eq!(entry.tokens, Some(1200));
    }

    #[test]
    fn test_all_rounds_cached() {
        let state = DisplayState::new();
        assert!(!state.all_rounds_cached());

        for round in 1..=6 {
            state.round_finished(round, "r", RoundDisplayStatus::Cached, None, None);
        }
        assert!(state.all_rounds_cached());

        state.round_finished(3, "r", RoundDisplayStatus::Done, Some(10), None);
        assert!(!state.all_rounds_cached());
    }

    #[test]
    fn test_parallel_saved_ignores_non_positive() {
        let state = DisplayState::new();
        state.set_parallel_saved(0);
        assert_eq!(state.parallel_saved_ms(), None);
        state.set_parallel_saved(-50);
        assert_eq!(state.parallel_saved_ms(), None);
        state.set_parallel_saved(1500);
        assert_eq!(state.parallel_saved_ms(), Some(1500));
    }

    #[test]
    fn test_tick_updates_running_rounds() {
        let state = DisplayState::new();
        state.round_started(2, "modules");
        std::thread::sleep(Duration::from_millis(5));
        state.tick();
        assert!(state.rounds()[&2].elapsed_ms >= 5);
    }
}
