//! Bounded repeat-until loop.

use super::evaluate::evaluation_passed;
use crate::errors::PipelineError;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::state::{slots, ResearchState};
use crate::step::{Step, StepResult};
use async_trait::async_trait;
use std::sync::Arc;

/// The phase of a bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// About to run the condition step.
    Evaluating,
    /// The condition did not pass; the body is running.
    Repeating,
    /// The condition passed.
    Done,
    /// The iteration cap was reached without a passing condition.
    MaxedOut,
}

/// A composite step that re-runs a step list until an evaluation passes or
/// an iteration cap is hit.
///
/// Each iteration first executes the condition step and reads its most
/// recent recorded judgment; a pass terminates the loop. Failures inside
/// the condition or the body propagate immediately; only exhausting the
/// iteration budget is a distinct, optionally non-fatal outcome.
pub struct RepeatUntil {
    name: String,
    condition: Arc<dyn Step>,
    body: Vec<Arc<dyn Step>>,
    max_iterations: usize,
    error_on_max: bool,
    retry: RetryPolicy,
}

impl RepeatUntil {
    /// Creates a loop with a cap of `max_iterations`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        condition: Arc<dyn Step>,
        body: Vec<Arc<dyn Step>>,
        max_iterations: usize,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            body,
            max_iterations,
            error_on_max: false,
            retry: RetryPolicy::none(),
        }
    }

    /// Makes reaching the iteration cap an error instead of a recorded
    /// outcome.
    #[must_use]
    pub fn with_error_on_max(mut self, error_on_max: bool) -> Self {
        self.error_on_max = error_on_max;
        self
    }

    /// Sets the retry policy applied to each body step.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn record_outcome(&self, state: &mut ResearchState, phase: LoopPhase, iterations: usize) {
        let loops = state
            .data
            .entry(slots::LOOPS.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(map) = loops {
            map.insert(
                self.name.clone(),
                serde_json::json!({
                    "completed": true,
                    "condition_met": phase == LoopPhase::Done,
                    "max_reached": phase == LoopPhase::MaxedOut,
                    "iterations": iterations,
                }),
            );
        }
    }
}

impl std::fmt::Debug for RepeatUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatUntil")
            .field("name", &self.name)
            .field("condition", &self.condition.name())
            .field("body", &self.body.len())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

#[async_trait]
impl Step for RepeatUntil {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut state: ResearchState) -> StepResult {
        if self.max_iterations == 0 {
            return Err(PipelineError::configuration(
                "repeat_until requires max_iterations >= 1",
            ));
        }

        let mut phase = LoopPhase::Evaluating;
        let mut iterations = 0usize;

        while iterations < self.max_iterations {
            iterations += 1;
            phase = LoopPhase::Evaluating;

            state = self.condition.execute(state).await?;
            let passed =
                evaluation_passed(&state, self.condition.name()).ok_or_else(|| {
                    PipelineError::configuration(format!(
                        "condition step '{}' recorded no evaluation",
                        self.condition.name()
                    ))
                })?;

            if passed {
                phase = LoopPhase::Done;
                break;
            }

            phase = LoopPhase::Repeating;
            tracing::debug!(
                loop_name = self.name.as_str(),
                iteration = iterations,
                "Condition not met, running loop body"
            );

            for step in &self.body {
                let current = state.clone();
                state = run_with_retry(&self.retry, PipelineError::is_retryable, || {
                    let step = step.clone();
                    let state = current.clone();
                    async move { step.execute(state).await }
                })
                .await?;
            }
        }

        if phase != LoopPhase::Done {
            phase = LoopPhase::MaxedOut;
            if self.error_on_max {
                return Err(PipelineError::max_iterations(self.max_iterations));
            }
        }

        self.record_outcome(&mut state, phase, iterations);
        Ok(state)
    }
}
