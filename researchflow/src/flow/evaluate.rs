//! A step that records a boolean+confidence judgment about the state.

use crate::errors::PipelineError;
use crate::state::{slots, ResearchState};
use crate::step::{Step, StepResult};
use crate::utils;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The outcome of an evaluation predicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Whether the state satisfies the condition.
    pub passed: bool,
    /// Confidence in the judgment, in `[0, 1]`.
    pub confidence: f64,
}

impl Judgment {
    /// A passing judgment with the given confidence.
    #[must_use]
    pub fn passed(confidence: f64) -> Self {
        Self { passed: true, confidence }
    }

    /// A failing judgment with the given confidence.
    #[must_use]
    pub fn failed(confidence: f64) -> Self {
        Self { passed: false, confidence }
    }
}

type EvalPredicate = Arc<dyn Fn(&ResearchState) -> Result<Judgment, PipelineError> + Send + Sync>;

/// A step that runs a caller-supplied predicate against the current state
/// and records the judgment under `data.evaluations[<name>]`.
///
/// The run's confidence score is raised to the max of its prior value and
/// the judgment's confidence. A predicate error propagates as a step
/// failure; it is never swallowed.
pub struct EvaluateStep {
    name: String,
    predicate: EvalPredicate,
}

impl EvaluateStep {
    /// Creates an evaluation step.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ResearchState) -> Result<Judgment, PipelineError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl std::fmt::Debug for EvaluateStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluateStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Step for EvaluateStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut state: ResearchState) -> StepResult {
        let judgment = (self.predicate)(&state)?;

        let entry = serde_json::json!({
            "passed": judgment.passed,
            "confidence_score": judgment.confidence,
            "timestamp": utils::iso_timestamp(),
        });

        let evaluations = state
            .data
            .entry(slots::EVALUATIONS.to_string())
            .or_insert_with(|| serde_json::json!({}));
        if let serde_json::Value::Object(map) = evaluations {
            map.insert(self.name.clone(), entry);
        }

        state.raise_confidence(judgment.confidence);
        Ok(state)
    }
}

/// Reads the most recent recorded judgment for `name`.
#[must_use]
pub fn evaluation_passed(state: &ResearchState, name: &str) -> Option<bool> {
    state
        .get(slots::EVALUATIONS)?
        .get(name)?
        .get("passed")?
        .as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_evaluate_records_judgment_and_raises_confidence() {
        let step = EvaluateStep::new("has_results", |state: &ResearchState| {
            Ok(if state.results().is_empty() {
                Judgment::failed(0.8)
            } else {
                Judgment::passed(0.8)
            })
        });

        let state = step.execute(ResearchState::new("q")).await.expect("evaluate succeeds");

        assert_eq!(evaluation_passed(&state, "has_results"), Some(false));
        assert!((state.metadata.confidence_score - 0.8).abs() < f64::EPSILON);

        let entry = &state.get(slots::EVALUATIONS).expect("evaluations slot")["has_results"];
        assert_eq!(entry["passed"], false);
        assert!(entry["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_confidence_never_drops() {
        let confident = EvaluateStep::new("first", |_: &ResearchState| Ok(Judgment::passed(0.9)));
        let doubtful = EvaluateStep::new("second", |_: &ResearchState| Ok(Judgment::passed(0.3)));

        let state = confident.execute(ResearchState::new("q")).await.expect("first evaluation");
        let state = doubtful.execute(state).await.expect("second evaluation");

        assert!((state.metadata.confidence_score - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_predicate_error_propagates() {
        let step = EvaluateStep::new("broken", |_: &ResearchState| {
            Err(PipelineError::processing("broken", "predicate bug"))
        });

        let result = step.execute(ResearchState::new("q")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_evaluation_reads_as_none() {
        let state = ResearchState::new("q");
        assert_eq!(evaluation_passed(&state, "absent"), None);
    }
}
