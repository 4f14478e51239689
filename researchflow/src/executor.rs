//! Sequential step execution under a single error-handling policy.
//!
//! The executor owns the control-flow contract of a pipeline run: per-step
//! retries, attempt recording, the stop/continue/rollback policy, and the
//! global deadline race. It never propagates step failures to the caller;
//! the returned state's error log is the interface for failure inspection.

use crate::collaborators::SchemaValidator;
use crate::errors::PipelineError;
use crate::events::{EventSink, LoggingEventSink};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{ErrorRecord, ResearchState, StepExecutionRecord};
use crate::step::Step;
use crate::utils;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// How the executor reacts to a step whose final attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorHandling {
    /// Halt after the first failed step; later steps never run.
    #[default]
    Stop,
    /// Record the failure and proceed to the next step with the state as of
    /// the failed step's last attempt.
    Continue,
    /// Invoke the failed step's rollback (when it defines one), then halt.
    Rollback,
}

/// Configuration for one pipeline run.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Policy applied when a step's final attempt fails.
    pub error_handling: ErrorHandling,
    /// Retry policy applied to every step.
    pub retry: RetryPolicy,
    /// Global deadline for the whole run.
    pub timeout: Option<Duration>,
    /// Sink for lifecycle events.
    pub event_sink: Arc<dyn EventSink>,
    /// Output contract checked once at the pipeline boundary.
    pub validator: Option<Arc<dyn SchemaValidator>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            error_handling: ErrorHandling::Stop,
            retry: RetryPolicy::default(),
            timeout: None,
            event_sink: Arc::new(LoggingEventSink::default()),
            validator: None,
        }
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("error_handling", &self.error_handling)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl PipelineConfig {
    /// Creates a config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error-handling policy.
    #[must_use]
    pub fn with_error_handling(mut self, policy: ErrorHandling) -> Self {
        self.error_handling = policy;
        self
    }

    /// Sets the per-step retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.retry.max_retries = retries;
        self
    }

    /// Replaces the whole retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Sets the global deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Sets the boundary output validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}

/// Runs an ordered step list against a state under one policy.
#[derive(Debug, Clone)]
pub struct SequentialExecutor {
    config: PipelineConfig,
}

impl SequentialExecutor {
    /// Creates an executor for the given config.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Returns the executor's config.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes the step list, racing the configured global deadline.
    ///
    /// Never returns an error for step failures: halting from stop,
    /// rollback, or timeout still yields the best-known state, and callers
    /// inspect its error log.
    pub async fn run(&self, state: ResearchState, steps: &[Arc<dyn Step>]) -> ResearchState {
        let Some(timeout) = self.config.timeout else {
            return self.run_steps(state, steps, None).await;
        };

        if timeout.is_zero() {
            let mut state = state;
            state.push_error(ErrorRecord::from_error(
                "pipeline",
                &PipelineError::configuration("timeout must be positive"),
            ));
            return state;
        }

        // Best-known state, refreshed at every step boundary. On deadline
        // expiry the losing branch is dropped, not interrupted mid-await;
        // its results are simply never observed.
        let checkpoint = Arc::new(Mutex::new(state.clone()));

        tokio::select! {
            state = self.run_steps(state, steps, Some(checkpoint.clone())) => state,
            () = tokio::time::sleep(timeout) => {
                let mut state = checkpoint.lock().clone();
                let err = PipelineError::timeout(timeout.as_millis() as u64);
                state.push_error(ErrorRecord::from_error("pipeline", &err));
                self.config.event_sink.try_emit(
                    "pipeline.timeout",
                    Some(serde_json::json!({ "timeout_ms": timeout.as_millis() as u64 })),
                );
                state
            }
        }
    }

    async fn run_steps(
        &self,
        mut state: ResearchState,
        steps: &[Arc<dyn Step>],
        checkpoint: Option<Arc<Mutex<ResearchState>>>,
    ) -> ResearchState {
        for step in steps {
            self.config.event_sink.try_emit(
                "step.started",
                Some(serde_json::json!({ "step": step.name() })),
            );

            let failure = self.attempt_with_retry(&mut state, step.as_ref()).await;

            match failure {
                None => {
                    self.config.event_sink.try_emit(
                        "step.completed",
                        Some(serde_json::json!({ "step": step.name() })),
                    );
                }
                Some(err) => {
                    state.push_error(ErrorRecord::from_error(step.name(), &err));
                    self.config.event_sink.try_emit(
                        "step.failed",
                        Some(serde_json::json!({
                            "step": step.name(),
                            "error": err.to_string(),
                        })),
                    );

                    match self.config.error_handling {
                        ErrorHandling::Continue => {
                            if let Some(ref checkpoint) = checkpoint {
                                *checkpoint.lock() = state.clone();
                            }
                            continue;
                        }
                        ErrorHandling::Stop => {
                            if let Some(ref checkpoint) = checkpoint {
                                *checkpoint.lock() = state.clone();
                            }
                            return state;
                        }
                        ErrorHandling::Rollback => {
                            state = self.roll_back(state, step.as_ref()).await;
                            if let Some(ref checkpoint) = checkpoint {
                                *checkpoint.lock() = state.clone();
                            }
                            return state;
                        }
                    }
                }
            }

            if let Some(ref checkpoint) = checkpoint {
                *checkpoint.lock() = state.clone();
            }
        }

        state
    }

    /// Runs one step under the retry policy, appending one attempt record
    /// per invocation. Returns the final error when all attempts failed.
    async fn attempt_with_retry(
        &self,
        state: &mut ResearchState,
        step: &dyn Step,
    ) -> Option<PipelineError> {
        let mut attempts = 0usize;

        loop {
            attempts += 1;
            let started_at = utils::now();

            match step.execute(state.clone()).await {
                Ok(mut next) => {
                    next.record_attempt(StepExecutionRecord {
                        step: step.name().to_string(),
                        started_at,
                        finished_at: utils::now(),
                        success: true,
                        error: None,
                    });
                    *state = next;
                    return None;
                }
                Err(err) => {
                    state.record_attempt(StepExecutionRecord {
                        step: step.name().to_string(),
                        started_at,
                        finished_at: utils::now(),
                        success: false,
                        error: Some(err.to_string()),
                    });

                    match self.config.retry.decide(attempts, err.is_retryable()) {
                        RetryDecision::Retry(delay) => {
                            tracing::debug!(
                                step = step.name(),
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying step after transient failure"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                            return Some(err);
                        }
                    }
                }
            }
        }
    }

    async fn roll_back(&self, state: ResearchState, step: &dyn Step) -> ResearchState {
        if !step.has_rollback() {
            return state;
        }

        self.config.event_sink.try_emit(
            "step.rollback",
            Some(serde_json::json!({ "step": step.name() })),
        );

        // Rollback failures are recorded, never propagated.
        match step.rollback(state.clone()).await {
            Ok(rolled_back) => rolled_back,
            Err(err) => {
                let mut state = state;
                tracing::warn!(step = step.name(), error = %err, "Rollback failed");
                state.push_error(ErrorRecord::from_error(step.name(), &err));
                state
            }
        }
    }
}

/// The single top-level entry point: executes a pipeline and finalizes the
/// state, validating the candidate result against the configured output
/// contract at the boundary.
pub async fn execute_pipeline(
    state: ResearchState,
    steps: &[Arc<dyn Step>],
    config: PipelineConfig,
) -> ResearchState {
    let sink = config.event_sink.clone();
    let validator = config.validator.clone();

    sink.try_emit(
        "pipeline.started",
        Some(serde_json::json!({
            "run_id": state.metadata.run_id.to_string(),
            "steps": steps.iter().map(|s| s.name()).collect::<Vec<_>>(),
        })),
    );

    let executor = SequentialExecutor::new(config);
    let mut state = executor.run(state, steps).await;

    if let Some(validator) = validator {
        match state.candidate_result() {
            Some(candidate) => match validator.validate(candidate) {
                Ok(validated) => {
                    if Some(&validated) != state.candidate_result() {
                        state.push_result(validated);
                    }
                }
                Err(err) => {
                    state.push_error(ErrorRecord::from_error("pipeline", &err));
                }
            },
            None => {
                state.push_error(ErrorRecord::from_error(
                    "pipeline",
                    &PipelineError::validation("pipeline produced no result to validate"),
                ));
            }
        }
    }

    state.finalize();
    sink.try_emit(
        "pipeline.completed",
        Some(serde_json::json!({
            "run_id": state.metadata.run_id.to_string(),
            "errors": state.errors().len(),
        })),
    );

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{FailingStep, FlakyStep, MockStep, NeverStep};
    use pretty_assertions::assert_eq;

    fn steps(list: Vec<Arc<dyn Step>>) -> Vec<Arc<dyn Step>> {
        list
    }

    #[tokio::test]
    async fn test_stop_policy_skips_later_steps() {
        let a = Arc::new(MockStep::new("a"));
        let failing = Arc::new(FailingStep::new("boom", false));
        let c = Arc::new(MockStep::new("c"));

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Stop)
                .with_max_retries(0),
        );

        let state = executor
            .run(
                ResearchState::new("q"),
                &steps(vec![a.clone(), failing.clone(), c.clone()]),
            )
            .await;

        assert_eq!(a.call_count(), 1);
        assert_eq!(failing.call_count(), 1);
        assert_eq!(c.call_count(), 0);
        assert_eq!(state.errors().len(), 1);
    }

    #[tokio::test]
    async fn test_continue_policy_attempts_every_step() {
        let a = Arc::new(FailingStep::new("a", false));
        let b = Arc::new(MockStep::new("b"));
        let c = Arc::new(FailingStep::new("c", false));

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Continue)
                .with_max_retries(0),
        );

        let state = executor
            .run(
                ResearchState::new("q"),
                &steps(vec![a.clone(), b.clone(), c.clone()]),
            )
            .await;

        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 1);
        assert_eq!(c.call_count(), 1);
        // One error per failed step.
        assert_eq!(state.errors().len(), 2);
        assert_eq!(state.metadata.step_history.len(), 3);
    }

    #[tokio::test]
    async fn test_rollback_policy_compensates_then_halts() {
        let writer = Arc::new(MockStep::new("writer"));
        let failing = Arc::new(FailingStep::new("failing", false).with_marking_rollback());
        let after = Arc::new(MockStep::new("after"));

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Rollback)
                .with_max_retries(0),
        );

        let state = executor
            .run(
                ResearchState::new("q"),
                &steps(vec![writer.clone(), failing.clone(), after.clone()]),
            )
            .await;

        assert_eq!(after.call_count(), 0);
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.get("rolled_back"), Some(&serde_json::json!("failing")));
    }

    #[tokio::test]
    async fn test_rollback_failure_is_recorded_not_thrown() {
        let failing = Arc::new(FailingStep::new("failing", false).with_failing_rollback());

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Rollback)
                .with_max_retries(0),
        );

        let state = executor
            .run(ResearchState::new("q"), &steps(vec![failing]))
            .await;

        // Step failure plus rollback failure.
        assert_eq!(state.errors().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_step_recovers_within_budget() {
        let flaky = Arc::new(FlakyStep::new("flaky", 1));

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Stop)
                .with_retry_policy(
                    RetryPolicy::new()
                        .with_max_retries(1)
                        .with_retry_delay(Duration::from_millis(5)),
                ),
        );

        let state = executor
            .run(ResearchState::new("q"), &steps(vec![flaky.clone()]))
            .await;

        assert_eq!(flaky.call_count(), 2);
        assert!(!state.has_errors());
        // One failed attempt and one successful attempt, both recorded.
        assert_eq!(state.metadata.step_history.len(), 2);
        assert!(!state.metadata.step_history[0].success);
        assert!(state.metadata.step_history[1].success);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_ignores_budget() {
        let failing = Arc::new(FailingStep::new("failing", false));

        let executor = SequentialExecutor::new(
            PipelineConfig::new().with_max_retries(5),
        );

        let state = executor
            .run(ResearchState::new("q"), &steps(vec![failing.clone()]))
            .await;

        assert_eq!(failing.call_count(), 1);
        assert_eq!(state.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_records_single_error_before_later_steps() {
        let never = Arc::new(NeverStep::new("hangs"));
        let after = Arc::new(MockStep::new("after"));

        let executor = SequentialExecutor::new(
            PipelineConfig::new()
                .with_max_retries(0)
                .with_timeout(Duration::from_millis(50)),
        );

        let state = executor
            .run(ResearchState::new("q"), &steps(vec![never, after.clone()]))
            .await;

        assert_eq!(after.call_count(), 0);
        assert_eq!(state.errors().len(), 1);
        assert_eq!(
            state.errors()[0].kind,
            crate::errors::ErrorKind::Timeout
        );
    }

    #[tokio::test]
    async fn test_zero_timeout_is_a_configuration_error() {
        let step = Arc::new(MockStep::new("a"));
        let executor = SequentialExecutor::new(
            PipelineConfig::new().with_timeout(Duration::ZERO),
        );

        let state = executor
            .run(ResearchState::new("q"), &steps(vec![step.clone()]))
            .await;

        assert_eq!(step.call_count(), 0);
        assert_eq!(
            state.errors()[0].kind,
            crate::errors::ErrorKind::Configuration
        );
    }

    #[tokio::test]
    async fn test_execute_pipeline_finalizes_and_validates() {
        struct RequireObject;
        impl SchemaValidator for RequireObject {
            fn validate(
                &self,
                value: &serde_json::Value,
            ) -> Result<serde_json::Value, PipelineError> {
                if value.is_object() {
                    Ok(value.clone())
                } else {
                    Err(PipelineError::validation("expected an object"))
                }
            }
        }

        let produce = Arc::new(crate::step::FnStep::new("produce", |mut state: ResearchState| async move {
            state.push_result(serde_json::json!("not an object"));
            Ok(state)
        }));

        let state = execute_pipeline(
            ResearchState::new("q"),
            &steps(vec![produce]),
            PipelineConfig::new().with_validator(Arc::new(RequireObject)),
        )
        .await;

        assert!(state.is_finalized());
        assert_eq!(state.errors().len(), 1);
        assert_eq!(state.errors()[0].kind, crate::errors::ErrorKind::Validation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_stop_policy_with_one_retry() {
        let a = Arc::new(MockStep::new("stepA"));
        let b = Arc::new(FlakyStep::new("stepB", 1));

        let state = execute_pipeline(
            ResearchState::new("X"),
            &steps(vec![a.clone(), b.clone()]),
            PipelineConfig::new()
                .with_error_handling(ErrorHandling::Stop)
                .with_retry_policy(
                    RetryPolicy::new()
                        .with_max_retries(1)
                        .with_retry_delay(Duration::from_millis(1)),
                ),
        )
        .await;

        assert!(!state.has_errors());
        assert_eq!(a.call_count(), 1);
        assert_eq!(b.call_count(), 2);
        // Attempt-level history: stepA once, stepB twice.
        assert_eq!(state.metadata.step_history.len(), 3);
    }

    #[tokio::test]
    async fn test_composite_pipeline_of_tracks_loop_and_orchestration() {
        use crate::flow::{EvaluateStep, Judgment, RepeatUntil};
        use crate::orchestrate::{Orchestrator, RoundRobinSelector, ToolRegistry};
        use crate::state::slots;
        use crate::step::FnStep;
        use crate::track::{Track, TrackSet};

        let gather = TrackSet::new(
            "gather",
            vec![
                Track::new(
                    "academic",
                    vec![Arc::new(FnStep::new("academic_search", |mut state: ResearchState| async move {
                        state.set("academic", serde_json::json!(["paper-1"]));
                        Ok(state)
                    }))],
                ),
                Track::new(
                    "news",
                    vec![Arc::new(FnStep::new("news_search", |mut state: ResearchState| async move {
                        state.set("news", serde_json::json!(["article-1"]));
                        Ok(state)
                    }))],
                ),
            ],
        )
        .expect("valid track set");

        let refine = RepeatUntil::new(
            "refine",
            Arc::new(EvaluateStep::new("enough_passes", |state: &ResearchState| {
                let passes = state.get("passes").and_then(serde_json::Value::as_u64).unwrap_or(0);
                Ok(if passes >= 2 { Judgment::passed(0.9) } else { Judgment::failed(0.4) })
            })),
            vec![Arc::new(FnStep::new("refine_pass", |mut state: ResearchState| async move {
                let passes = state.get("passes").and_then(serde_json::Value::as_u64).unwrap_or(0);
                state.set("passes", serde_json::json!(passes + 1));
                Ok(state)
            }))],
            5,
        );

        let registry = ToolRegistry::new();
        registry.register(Arc::new(MockStep::new("summarize")));
        let orchestrate = Orchestrator::new(
            "wrap_up",
            Arc::new(RoundRobinSelector::new()),
            Arc::new(registry),
            2,
        );

        let state = execute_pipeline(
            ResearchState::new("composite"),
            &steps(vec![Arc::new(gather), Arc::new(refine), Arc::new(orchestrate)]),
            PipelineConfig::new(),
        )
        .await;

        assert!(!state.has_errors());
        assert!(state.is_finalized());

        let tracks = state.get(slots::TRACKS).expect("merged tracks");
        assert_eq!(tracks["academic"]["data"]["academic"][0], "paper-1");
        assert_eq!(state.get("passes"), Some(&serde_json::json!(2)));
        assert_eq!(
            state.get(slots::LOOPS).expect("loop record")["refine"]["condition_met"],
            true
        );
        assert_eq!(
            state.get(slots::ORCHESTRATION).expect("summary")["success_rate"],
            1.0
        );
        // Confidence carries the loop's passing judgment.
        assert!(state.metadata.confidence_score >= 0.9);
    }
}
