//! Parallel execution of independent step sequences ("tracks").
//!
//! All tracks start before any is awaited and share one deadline. Per-track
//! outcomes are reconciled by a [`MergeStrategy`]; because completion order
//! is scheduler-dependent, strategies only ever consult declaration order.

mod merge;

pub use merge::{MergeFn, MergeStrategy};

use crate::errors::PipelineError;
use crate::events::{EventSink, LoggingEventSink};
use crate::executor::{ErrorHandling, PipelineConfig, SequentialExecutor};
use crate::retry::RetryPolicy;
use crate::state::{slots, ErrorRecord, ResearchState};
use crate::step::{Step, StepResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// An independently executable sub-sequence of steps.
pub struct Track {
    /// The track name. Used as the namespace key in merged output.
    pub name: String,
    /// The steps to run sequentially within the track.
    pub steps: Vec<Arc<dyn Step>>,
    /// Caller-assigned weight for the `Weighted` merge strategy.
    pub weight: f64,
}

impl Track {
    /// Creates a track with weight 1.0.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
            weight: 1.0,
        }
    }

    /// Sets the merge weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("weight", &self.weight)
            .finish()
    }
}

/// The outcome of one track's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResult {
    /// The track name.
    pub name: String,
    /// Results accumulated within the track.
    pub results: Vec<serde_json::Value>,
    /// The track's final scratch space.
    pub data: HashMap<String, serde_json::Value>,
    /// Errors recorded within the track.
    pub errors: Vec<ErrorRecord>,
    /// Whether the track ran to completion without a fatal step failure.
    pub completed: bool,
    /// Highest confidence recorded within the track.
    pub confidence: f64,
    /// The track's caller-assigned weight.
    pub weight: f64,
}

/// Runs named tracks concurrently and merges their outcomes.
///
/// Implements [`Step`], so a track set can be nested inside any pipeline.
pub struct TrackSet {
    name: String,
    tracks: Vec<Arc<Track>>,
    continue_on_error: bool,
    isolate: bool,
    timeout: Option<Duration>,
    merge: MergeStrategy,
    retry: RetryPolicy,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TrackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackSet")
            .field("name", &self.name)
            .field("tracks", &self.tracks)
            .field("continue_on_error", &self.continue_on_error)
            .field("isolate", &self.isolate)
            .field("timeout", &self.timeout)
            .field("merge", &self.merge)
            .finish()
    }
}

impl TrackSet {
    /// Creates a track set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `tracks` is empty.
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Result<Self, PipelineError> {
        if tracks.is_empty() {
            return Err(PipelineError::configuration(
                "a track set requires at least one track",
            ));
        }
        Ok(Self {
            name: name.into(),
            tracks: tracks.into_iter().map(Arc::new).collect(),
            continue_on_error: false,
            isolate: true,
            timeout: None,
            merge: MergeStrategy::default(),
            retry: RetryPolicy::default(),
            event_sink: Arc::new(LoggingEventSink::default()),
        })
    }

    /// Contains per-track failures to that track's result instead of
    /// aborting the whole parallel run.
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// With `isolate` each track starts from an empty data scope; otherwise
    /// each receives a copy of the parent's data.
    #[must_use]
    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate = isolate;
        self
    }

    /// Sets the shared deadline governing all tracks collectively.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the merge strategy.
    #[must_use]
    pub fn with_merge_strategy(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    /// Sets the retry policy applied to steps inside each track.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    async fn run_tracks(&self, parent: &ResearchState) -> Result<Vec<TrackResult>, PipelineError> {
        // Spawn everything before awaiting anything so all tracks make
        // progress concurrently.
        let handles: Vec<_> = self
            .tracks
            .iter()
            .map(|track| {
                let track = track.clone();
                let child = parent.fork_for_track(&track.name, self.isolate);
                let executor = SequentialExecutor::new(
                    PipelineConfig::new()
                        .with_error_handling(ErrorHandling::Stop)
                        .with_retry_policy(self.retry.clone())
                        .with_event_sink(self.event_sink.clone()),
                );

                tokio::spawn(async move {
                    let state = executor.run(child, &track.steps).await;
                    TrackResult {
                        name: track.name.clone(),
                        completed: !state.has_errors(),
                        confidence: state.metadata.confidence_score,
                        weight: track.weight,
                        results: state.results().to_vec(),
                        errors: state.errors().to_vec(),
                        data: state.data,
                    }
                })
            })
            .collect();

        let joined = futures::future::join_all(handles);
        let outcomes = match self.timeout {
            Some(deadline) => tokio::time::timeout(deadline, joined).await.map_err(|_| {
                // Tracks keep running in the background; their late results
                // are never observed.
                PipelineError::timeout(deadline.as_millis() as u64)
            })?,
            None => joined.await,
        };

        // Collected in declaration order regardless of completion order.
        let mut results = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let result = match outcome {
                Ok(result) => result,
                Err(join_err) => {
                    let name = self.tracks[index].name.clone();
                    let err = PipelineError::processing(&name, join_err.to_string());
                    TrackResult {
                        name,
                        results: Vec::new(),
                        data: HashMap::new(),
                        errors: vec![ErrorRecord::from_error(&self.tracks[index].name, &err)],
                        completed: false,
                        confidence: 0.0,
                        weight: self.tracks[index].weight,
                    }
                }
            };

            self.event_sink.try_emit(
                "track.finished",
                Some(serde_json::json!({
                    "track": result.name,
                    "completed": result.completed,
                })),
            );

            results.push(result);
        }

        if !self.continue_on_error {
            if let Some(failed) = results.iter().find(|r| !r.completed) {
                let message = failed
                    .errors
                    .first()
                    .map_or_else(|| "track failed".to_string(), |e| e.message.clone());
                return Err(PipelineError::processing(&failed.name, message));
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl Step for TrackSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut state: ResearchState) -> StepResult {
        let results = self.run_tracks(&state).await?;

        for result in &results {
            state.raise_confidence(result.confidence);
        }

        let merged = self.merge.merge(&results);
        state.set(slots::TRACKS, merged.clone());
        state.push_result(merged);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::flow::EvaluateStep;
    use crate::step::FnStep;
    use crate::testing::mocks::{FailingStep, MockStep, NeverStep};
    use pretty_assertions::assert_eq;

    fn writing_track(name: &str, key: &str, value: &str) -> Track {
        let key = key.to_string();
        let value = value.to_string();
        Track::new(
            name,
            vec![Arc::new(FnStep::new(format!("write_{name}"), move |mut state: ResearchState| {
                let key = key.clone();
                let value = value.clone();
                async move {
                    state.set(key, serde_json::json!(value));
                    Ok(state)
                }
            }))],
        )
    }

    #[test]
    fn test_empty_track_list_is_a_configuration_error() {
        let err = TrackSet::new("empty", Vec::new()).expect_err("must reject empty tracks");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_tracks_run_and_merge_by_track() {
        let set = TrackSet::new(
            "gather",
            vec![
                writing_track("academic", "finding", "peer-reviewed"),
                writing_track("news", "finding", "breaking"),
            ],
        )
        .expect("valid track set");

        let state = set.execute(ResearchState::new("q")).await.expect("tracks succeed");
        let merged = state.get(slots::TRACKS).expect("merged output stored");

        assert_eq!(merged["academic"]["data"]["finding"], "peer-reviewed");
        assert_eq!(merged["news"]["data"]["finding"], "breaking");
        assert_eq!(state.results().len(), 1);
    }

    #[tokio::test]
    async fn test_most_confident_merge_ignores_completion_order() {
        // Track A records high confidence but resolves last; track B
        // resolves immediately with low confidence. A's value must win.
        let slow_confident = Track::new(
            "a",
            vec![
                Arc::new(FnStep::new("slow", |state: ResearchState| async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(state)
                })),
                Arc::new(EvaluateStep::new("certain", |_state: &ResearchState| {
                    Ok(crate::flow::Judgment::passed(0.9))
                })),
                Arc::new(FnStep::new("write_a", |mut state: ResearchState| async move {
                    state.set("key", serde_json::json!("from-a"));
                    Ok(state)
                })),
            ],
        );
        let fast_doubtful = Track::new(
            "b",
            vec![
                Arc::new(EvaluateStep::new("doubtful", |_state: &ResearchState| {
                    Ok(crate::flow::Judgment::passed(0.5))
                })),
                Arc::new(FnStep::new("write_b", |mut state: ResearchState| async move {
                    state.set("key", serde_json::json!("from-b"));
                    Ok(state)
                })),
            ],
        );

        let set = TrackSet::new("race", vec![slow_confident, fast_doubtful])
            .expect("valid track set")
            .with_merge_strategy(MergeStrategy::MostConfident);

        let state = set.execute(ResearchState::new("q")).await.expect("tracks succeed");
        assert_eq!(state.get(slots::TRACKS).expect("merged")["key"], "from-a");
    }

    #[tokio::test]
    async fn test_track_failure_aborts_run_without_continue_on_error() {
        let set = TrackSet::new(
            "strict",
            vec![
                writing_track("good", "k", "v"),
                Track::new("bad", vec![Arc::new(FailingStep::new("explode", false))]),
            ],
        )
        .expect("valid track set");

        let err = set
            .execute(ResearchState::new("q"))
            .await
            .expect_err("track failure must abort");
        assert_eq!(err.kind(), ErrorKind::Processing);
        assert_eq!(err.step(), Some("bad"));
    }

    #[tokio::test]
    async fn test_track_failure_is_contained_with_continue_on_error() {
        let set = TrackSet::new(
            "tolerant",
            vec![
                Track::new("bad", vec![Arc::new(FailingStep::new("explode", false))]),
                writing_track("good", "k", "v"),
            ],
        )
        .expect("valid track set")
        .with_continue_on_error(true);

        let state = set.execute(ResearchState::new("q")).await.expect("run succeeds");
        let merged = state.get(slots::TRACKS).expect("merged output");

        assert_eq!(merged["bad"]["completed"], false);
        assert_eq!(merged["good"]["completed"], true);
        assert_eq!(merged["good"]["data"]["k"], "v");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_deadline_fails_the_whole_run() {
        let set = TrackSet::new(
            "deadline",
            vec![
                writing_track("fast", "k", "v"),
                Track::new("stuck", vec![Arc::new(NeverStep::new("hang"))]),
            ],
        )
        .expect("valid track set")
        .with_timeout(Duration::from_millis(20));

        let err = set
            .execute(ResearchState::new("q"))
            .await
            .expect_err("deadline must fail the run");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_isolated_tracks_do_not_see_parent_data() {
        let probe = Track::new(
            "probe",
            vec![Arc::new(FnStep::new("check", |mut state: ResearchState| async move {
                let saw_parent = state.get("parent_slot").is_some();
                state.set("saw_parent", serde_json::json!(saw_parent));
                Ok(state)
            }))],
        );

        let mut parent = ResearchState::new("q");
        parent.set("parent_slot", serde_json::json!("secret"));

        let isolated = TrackSet::new("iso", vec![probe]).expect("valid track set");
        let state = isolated.execute(parent.clone()).await.expect("run succeeds");
        let merged = state.get(slots::TRACKS).expect("merged output");
        assert_eq!(merged["probe"]["data"]["saw_parent"], false);
    }

    #[tokio::test]
    async fn test_shared_tracks_see_a_copy_of_parent_data() {
        let probe = Track::new(
            "probe",
            vec![Arc::new(FnStep::new("check", |mut state: ResearchState| async move {
                let saw_parent = state.get("parent_slot").is_some();
                state.set("saw_parent", serde_json::json!(saw_parent));
                Ok(state)
            }))],
        );

        let mut parent = ResearchState::new("q");
        parent.set("parent_slot", serde_json::json!("secret"));

        let shared = TrackSet::new("shared", vec![probe])
            .expect("valid track set")
            .with_isolation(false);
        let state = shared.execute(parent).await.expect("run succeeds");
        let merged = state.get(slots::TRACKS).expect("merged output");
        assert_eq!(merged["probe"]["data"]["saw_parent"], true);
    }
}
