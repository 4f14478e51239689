//! Step trait and closure adapters.
//!
//! Steps are the fundamental units of work in a researchflow pipeline.
//! Composition is closed: sequential pipelines, parallel track sets, bounded
//! loops, and orchestration loops all implement this trait, so any of them
//! can be nested inside another as an ordinary step.

use crate::errors::PipelineError;
use crate::state::ResearchState;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

/// Result of a single step execution.
pub type StepResult = Result<ResearchState, PipelineError>;

/// Trait for pipeline steps.
///
/// A step consumes its incoming state and returns a new one. Steps are pure
/// with respect to the state contract but may perform arbitrary side effects
/// (network calls) internally.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Executes the step against the given state.
    async fn execute(&self, state: ResearchState) -> StepResult;

    /// Compensates for a previously applied execution.
    ///
    /// The default implementation returns the state unchanged; steps with
    /// real compensation logic should also override [`Step::has_rollback`].
    async fn rollback(&self, state: ResearchState) -> StepResult {
        Ok(state)
    }

    /// Whether this step defines a rollback.
    fn has_rollback(&self) -> bool {
        false
    }
}

type StepFn = Arc<dyn Fn(ResearchState) -> BoxFuture<'static, StepResult> + Send + Sync>;

/// An async closure-based step.
pub struct FnStep {
    name: String,
    execute: StepFn,
    rollback: Option<StepFn>,
}

impl FnStep {
    /// Creates a new closure-based step.
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ResearchState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            execute: Arc::new(move |state| Box::pin(func(state))),
            rollback: None,
        }
    }

    /// Attaches a rollback closure.
    #[must_use]
    pub fn with_rollback<F, Fut>(mut self, func: F) -> Self
    where
        F: Fn(ResearchState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        self.rollback = Some(Arc::new(move |state| Box::pin(func(state))));
        self
    }
}

impl Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("has_rollback", &self.rollback.is_some())
            .finish()
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: ResearchState) -> StepResult {
        (self.execute)(state).await
    }

    async fn rollback(&self, state: ResearchState) -> StepResult {
        match &self.rollback {
            Some(rollback) => rollback(state).await,
            None => Ok(state),
        }
    }

    fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_step_executes_closure() {
        let step = FnStep::new("tag", |mut state: ResearchState| async move {
            state.set("tagged", serde_json::json!(true));
            Ok(state)
        });

        assert_eq!(step.name(), "tag");
        assert!(!step.has_rollback());

        let state = step.execute(ResearchState::new("q")).await.expect("step succeeds");
        assert_eq!(state.get("tagged"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_fn_step_rollback_attachment() {
        let step = FnStep::new("write", |mut state: ResearchState| async move {
            state.set("written", serde_json::json!(1));
            Ok(state)
        })
        .with_rollback(|mut state: ResearchState| async move {
            state.data.remove("written");
            Ok(state)
        });

        assert!(step.has_rollback());

        let state = step.execute(ResearchState::new("q")).await.expect("step succeeds");
        let state = step.rollback(state).await.expect("rollback succeeds");
        assert!(state.get("written").is_none());
    }

    #[tokio::test]
    async fn test_default_rollback_is_identity() {
        let step = FnStep::new("noop", |state| async move { Ok(state) });
        let mut state = ResearchState::new("q");
        state.set("kept", serde_json::json!("v"));

        let state = step.rollback(state).await.expect("identity rollback");
        assert_eq!(state.get("kept"), Some(&serde_json::json!("v")));
    }
}
