//! Sequencing of Extract → Load → Transform, and whole-run retries.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, info_span, warn, Instrument};

use crate::error::{ErrorKind, PipelineError, Result};
use crate::extractor::EventSource;
use crate::loader::{LoadOutcome, Loader};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::FeedWindow;
use crate::transform::{TransformEngine, TransformOutcome};

/// The three pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetch from the feed
    Extract,
    /// Write to the raw store
    Load,
    /// Derive the analytics window
    Transform,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Load => "load",
            Self::Transform => "transform",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Nothing started yet
    Init,
    /// Extract running
    Extracting,
    /// Load running
    Loading,
    /// Transform running
    Transforming,
    /// All stages succeeded
    Complete,
    /// Terminal; carries the stage that failed
    Failed(Stage),
}

impl RunState {
    /// Stage being executed in this state, if any
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Extracting => Some(Stage::Extract),
            Self::Loading => Some(Stage::Load),
            Self::Transforming => Some(Stage::Transform),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }

    /// The only state that may follow this one on success
    const fn successor(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Extracting),
            Self::Extracting => Some(Self::Loading),
            Self::Loading => Some(Self::Transforming),
            Self::Transforming => Some(Self::Complete),
            Self::Complete | Self::Failed(_) => None,
        }
    }
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid run transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Enforces `Init → Extracting → Loading → Transforming → Complete`, with any
/// stage allowed to drop into `Failed`.
#[derive(Debug, Clone)]
pub struct RunTracker {
    state: RunState,
    history: Vec<RunState>,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self {
            state: RunState::Init,
            history: vec![RunState::Init],
        }
    }
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited, in order, starting with `Init`
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `next`, rejecting skips, repeats and moves out of a terminal state.
    pub fn transition(&mut self, next: RunState) -> std::result::Result<(), InvalidTransition> {
        let allowed = match next {
            RunState::Failed(stage) => self.state.stage() == Some(stage),
            other => self.state.successor() == Some(other),
        };
        if !allowed {
            return Err(InvalidTransition { from: self.state, to: next });
        }
        info!(from = ?self.state, to = ?next, "Run state changed");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Advance to the next state on the success path
    pub fn advance(&mut self) -> std::result::Result<RunState, InvalidTransition> {
        let next = self
            .state
            .successor()
            .ok_or(InvalidTransition { from: self.state, to: self.state })?;
        self.transition(next)?;
        Ok(next)
    }

    /// Mark the current stage as failed
    pub fn fail(&mut self) -> std::result::Result<RunState, InvalidTransition> {
        let stage = self
            .state
            .stage()
            .ok_or(InvalidTransition { from: self.state, to: self.state })?;
        let next = RunState::Failed(stage);
        self.transition(next)?;
        Ok(next)
    }
}

/// Counts from a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Events returned by the feed
    pub extracted: u64,
    /// Committed load
    pub load: LoadOutcome,
    /// Committed transform
    pub transform: TransformOutcome,
    /// States visited, ending in `Complete`
    pub history: Vec<RunState>,
}

/// Details of a failed run
#[derive(Debug)]
pub struct RunFailure {
    /// Stage that failed
    pub stage: Stage,
    /// Error returned by that stage
    pub error: PipelineError,
    /// Events extracted before the failure, if extraction finished
    pub extracted: Option<u64>,
    /// Load result, if the load committed before the failure
    pub load: Option<LoadOutcome>,
    /// States visited, ending in `Failed`
    pub history: Vec<RunState>,
}

impl RunFailure {
    pub const fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Tagged result of one run, inspected by the orchestrator
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    Failed(RunFailure),
}

impl RunOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Final state of the run
    pub fn final_state(&self) -> RunState {
        let history = match self {
            Self::Completed(summary) => &summary.history,
            Self::Failed(failure) => &failure.history,
        };
        history.last().copied().unwrap_or(RunState::Init)
    }

    /// Convert into a plain `Result`, dropping the partial counts of a failure
    pub fn into_result(self) -> Result<RunSummary> {
        match self {
            Self::Completed(summary) => Ok(summary),
            Self::Failed(failure) => Err(failure.error),
        }
    }
}

/// One pipeline instance: an event source, the loader and the transform engine.
pub struct Pipeline<S> {
    source: S,
    loader: Loader,
    engine: TransformEngine,
    metrics: MetricsCollector,
}

impl<S: EventSource> Pipeline<S> {
    pub fn new(source: S, loader: Loader, engine: TransformEngine) -> Self {
        Self {
            source,
            loader,
            engine,
            metrics: MetricsCollector::default(),
        }
    }

    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Execute one run over `window`, stamping stored rows with the current time
    pub async fn run(&mut self, window: &FeedWindow) -> RunOutcome {
        self.run_at(window, Utc::now()).await
    }

    /// Execute one run, stage by stage, treating `now` as the current time.
    ///
    /// Stages never overlap; the first failure ends the run in `Failed`.
    pub async fn run_at(&mut self, window: &FeedWindow, now: DateTime<Utc>) -> RunOutcome {
        let span = info_span!("pipeline_run", start = %window.start, end = %window.end);
        self.run_stages(window, now).instrument(span).await
    }

    async fn run_stages(&mut self, window: &FeedWindow, now: DateTime<Utc>) -> RunOutcome {
        let mut tracker = RunTracker::new();

        // Extract
        enter(&mut tracker);
        let timer = OperationTimer::new("extract");
        let batch = match self.source.fetch(window).await {
            Ok(batch) => batch,
            Err(error) => return self.fail(tracker, timer, error, None, None),
        };
        self.metrics.record_stage(Stage::Extract, timer.finish(), true);
        self.metrics.record_extract(batch.len());
        let extracted = batch.len() as u64;

        // Load
        enter(&mut tracker);
        let timer = OperationTimer::new("load");
        let load = match self.loader.load_at(&batch, now) {
            Ok(load) => load,
            Err(error) => return self.fail(tracker, timer, error, Some(extracted), None),
        };
        self.metrics.record_stage(Stage::Load, timer.finish(), true);
        self.metrics.record_load(load.records_loaded, load.duplicates());

        // Transform
        enter(&mut tracker);
        let timer = OperationTimer::new("transform");
        let transform = match self.engine.run_at(now) {
            Ok(transform) => transform,
            Err(error) => return self.fail(tracker, timer, error, Some(extracted), Some(load)),
        };
        self.metrics.record_stage(Stage::Transform, timer.finish(), true);
        self.metrics.record_transform(transform.scanned);

        enter(&mut tracker);
        info!(
            extracted,
            loaded = load.records_loaded,
            transformed = transform.scanned,
            "Pipeline run complete"
        );
        RunOutcome::Completed(RunSummary {
            extracted,
            load,
            transform,
            history: tracker.history().to_vec(),
        })
    }

    fn fail(
        &mut self,
        mut tracker: RunTracker,
        timer: OperationTimer,
        error: PipelineError,
        extracted: Option<u64>,
        load: Option<LoadOutcome>,
    ) -> RunOutcome {
        let stage = tracker.state().stage().unwrap_or(Stage::Extract);
        self.metrics.record_stage(stage, timer.elapsed(), false);
        if let Err(e) = tracker.fail() {
            warn!(error = %e, "Run tracker rejected failure transition");
        }
        error!(%stage, kind = %error.kind(), error = %error, "Pipeline stage failed");
        RunOutcome::Failed(RunFailure {
            stage,
            error,
            extracted,
            load,
            history: tracker.history().to_vec(),
        })
    }
}

/// Success-path transitions are fixed by the stage order in `run_stages`.
fn enter(tracker: &mut RunTracker) {
    if let Err(e) = tracker.advance() {
        warn!(error = %e, "Run tracker rejected transition");
    }
}

/// How many times a whole run is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5 * 60),
        }
    }
}

/// Report of an orchestrated run
#[derive(Debug)]
pub struct OrchestratedRun {
    /// Attempts made, starting at 1
    pub attempts: u32,
    /// Outcome of the last attempt
    pub outcome: RunOutcome,
}

/// Drives whole runs and retries them on failure; never retries single stages.
pub struct Orchestrator {
    policy: RetryPolicy,
}

impl Orchestrator {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the pipeline until one attempt completes or the attempts run out.
    pub async fn execute<S: EventSource>(&self, pipeline: &mut Pipeline<S>, window: &FeedWindow) -> OrchestratedRun {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            pipeline.metrics.record_attempt();
            let outcome = pipeline.run(window).await;

            let retry = match &outcome {
                RunOutcome::Completed(_) => false,
                RunOutcome::Failed(failure) => {
                    warn!(
                        attempt,
                        max_attempts,
                        stage = %failure.stage,
                        kind = %failure.kind(),
                        "Run attempt failed"
                    );
                    attempt < max_attempts
                },
            };

            if !retry {
                pipeline.metrics.record_run(outcome.is_success());
                return OrchestratedRun { attempts: attempt, outcome };
            }

            info!(delay_secs = self.policy.delay.as_secs(), "Retrying run after delay");
            tokio::time::sleep(self.policy.delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::extractor::MockEventSource;
    use crate::models::ExtractedEvent;
    use tempfile::tempdir;

    fn feature(id: &str, mag: f64) -> ExtractedEvent {
        ExtractedEvent::from_json(&format!(
            r#"{{"id":"{id}","properties":{{"time":1704067200000,"mag":{mag},"magType":"ml","place":"5km N of Nowhereville"}},"geometry":{{"coordinates":[-120.0,36.0,8.0]}}}}"#
        ))
        .unwrap()
    }

    fn window() -> FeedWindow {
        FeedWindow::trailing(Utc::now(), chrono::Duration::hours(24), 2.5)
    }

    fn pipeline(db: &Database, source: MockEventSource) -> Pipeline<MockEventSource> {
        Pipeline::new(
            source,
            Loader::new(db.clone(), "USGS API"),
            TransformEngine::with_default_window(db.clone()),
        )
    }

    #[test]
    fn test_tracker_happy_path() {
        let mut tracker = RunTracker::new();
        for _ in 0..4 {
            tracker.advance().unwrap();
        }
        assert_eq!(
            tracker.history(),
            &[
                RunState::Init,
                RunState::Extracting,
                RunState::Loading,
                RunState::Transforming,
                RunState::Complete
            ]
        );
        assert!(tracker.advance().is_err());
    }

    #[test]
    fn test_tracker_rejects_skips_and_terminal_moves() {
        let mut tracker = RunTracker::new();
        assert!(tracker.transition(RunState::Loading).is_err());
        assert!(tracker.fail().is_err());

        tracker.advance().unwrap();
        assert!(tracker.transition(RunState::Failed(Stage::Load)).is_err());
        assert_eq!(tracker.fail().unwrap(), RunState::Failed(Stage::Extract));
        assert!(tracker.state().is_terminal());
        assert!(tracker.advance().is_err());
    }

    #[tokio::test]
    async fn test_run_completes() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db").to_str().unwrap()).unwrap();

        let mut source = MockEventSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(vec![feature("a", 3.1), feature("b", 5.2)]));

        let mut pipeline = pipeline(&db, source);
        let outcome = pipeline.run(&window()).await;

        assert_eq!(outcome.final_state(), RunState::Complete);
        let summary = outcome.into_result().unwrap();
        assert_eq!(summary.extracted, 2);
        assert_eq!(summary.load.records_loaded, 2);
        assert_eq!(summary.transform.inserted, 2);
        assert_eq!(pipeline.metrics().records_loaded_total, 2);
    }

    #[tokio::test]
    async fn test_extract_failure_skips_later_stages() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db").to_str().unwrap()).unwrap();

        let mut source = MockEventSource::new();
        source
            .expect_fetch()
            .returning(|_| Err(PipelineError::invalid_response("HTTP 503")));

        let mut pipeline = pipeline(&db, source);
        let outcome = pipeline.run(&window()).await;

        let RunOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, Stage::Extract);
        assert_eq!(failure.kind(), ErrorKind::Transport);
        assert_eq!(failure.history, vec![RunState::Init, RunState::Extracting, RunState::Failed(Stage::Extract)]);
        // Nothing was loaded, so the ledger stays empty
        assert_eq!(db.counts().unwrap().load_attempts, 0);
    }

    #[tokio::test]
    async fn test_orchestrator_retries_whole_run() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db").to_str().unwrap()).unwrap();

        let mut source = MockEventSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(PipelineError::invalid_response("timeout")));
        source
            .expect_fetch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![feature("a", 4.0)]));

        let mut pipeline = pipeline(&db, source);
        let orchestrator = Orchestrator::new(RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        });
        let run = orchestrator.execute(&mut pipeline, &window()).await;

        assert_eq!(run.attempts, 2);
        assert!(run.outcome.is_success());
        assert_eq!(pipeline.metrics().run_attempts_total, 2);
        assert_eq!(pipeline.metrics().runs_total, 1);
    }

    #[tokio::test]
    async fn test_orchestrator_gives_up_after_max_attempts() {
        let dir = tempdir().unwrap();
        let db = Database::new(dir.path().join("test.db").to_str().unwrap()).unwrap();

        let mut source = MockEventSource::new();
        source
            .expect_fetch()
            .times(3)
            .returning(|_| Err(PipelineError::invalid_response("HTTP 500")));

        let mut pipeline = pipeline(&db, source);
        let orchestrator = Orchestrator::new(RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        });
        let run = orchestrator.execute(&mut pipeline, &window()).await;

        assert_eq!(run.attempts, 3);
        assert_eq!(run.outcome.final_state(), RunState::Failed(Stage::Extract));
        assert_eq!(pipeline.metrics().runs_failed, 1);
    }
}
