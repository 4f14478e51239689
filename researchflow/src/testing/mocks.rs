//! Mock steps and collaborators for testing.

use crate::collaborators::{LanguageModel, SchemaValidator, SearchHit, SearchProvider};
use crate::errors::PipelineError;
use crate::state::ResearchState;
use crate::step::{Step, StepResult};
use async_trait::async_trait;
use parking_lot::Mutex;

/// A step that succeeds, records calls, and optionally writes a slot.
#[derive(Debug)]
pub struct MockStep {
    name: String,
    call_count: Mutex<usize>,
    writes: Option<(String, serde_json::Value)>,
}

impl MockStep {
    /// Creates a mock step that succeeds without touching the state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call_count: Mutex::new(0),
            writes: None,
        }
    }

    /// Makes the step write `value` into `slot` on every execution.
    #[must_use]
    pub fn with_write(mut self, slot: impl Into<String>, value: serde_json::Value) -> Self {
        self.writes = Some((slot.into(), value));
        self
    }

    /// Returns the number of times the step was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Step for MockStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut state: ResearchState) -> StepResult {
        *self.call_count.lock() += 1;
        if let Some((slot, value)) = &self.writes {
            state.set(slot.clone(), value.clone());
        }
        Ok(state)
    }
}

/// A step that always fails, optionally with a retryable error and
/// configurable rollback behavior.
#[derive(Debug)]
pub struct FailingStep {
    name: String,
    retryable: bool,
    call_count: Mutex<usize>,
    rollback: RollbackBehavior,
}

#[derive(Debug, Clone, Copy)]
enum RollbackBehavior {
    None,
    MarkState,
    Fail,
}

impl FailingStep {
    /// Creates a step that fails every execution.
    #[must_use]
    pub fn new(name: impl Into<String>, retryable: bool) -> Self {
        Self {
            name: name.into(),
            retryable,
            call_count: Mutex::new(0),
            rollback: RollbackBehavior::None,
        }
    }

    /// Gives the step a rollback that marks the state.
    #[must_use]
    pub fn with_marking_rollback(mut self) -> Self {
        self.rollback = RollbackBehavior::MarkState;
        self
    }

    /// Gives the step a rollback that itself fails.
    #[must_use]
    pub fn with_failing_rollback(mut self) -> Self {
        self.rollback = RollbackBehavior::Fail;
        self
    }

    /// Returns the number of times the step was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Step for FailingStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _state: ResearchState) -> StepResult {
        *self.call_count.lock() += 1;
        if self.retryable {
            Err(PipelineError::transient(format!("{} is flapping", self.name)))
        } else {
            Err(PipelineError::processing(&self.name, "intentional failure"))
        }
    }

    async fn rollback(&self, mut state: ResearchState) -> StepResult {
        match self.rollback {
            RollbackBehavior::None => Ok(state),
            RollbackBehavior::MarkState => {
                state.set("rolled_back", serde_json::json!(self.name));
                Ok(state)
            }
            RollbackBehavior::Fail => {
                Err(PipelineError::processing(&self.name, "rollback failed too"))
            }
        }
    }

    fn has_rollback(&self) -> bool {
        !matches!(self.rollback, RollbackBehavior::None)
    }
}

/// A step that fails with a transient error a fixed number of times, then
/// succeeds on every later execution.
#[derive(Debug)]
pub struct FlakyStep {
    name: String,
    failures: usize,
    call_count: Mutex<usize>,
}

impl FlakyStep {
    /// Creates a step that fails `failures` times before succeeding.
    #[must_use]
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        Self {
            name: name.into(),
            failures,
            call_count: Mutex::new(0),
        }
    }

    /// Returns the number of times the step was executed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock()
    }
}

#[async_trait]
impl Step for FlakyStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, state: ResearchState) -> StepResult {
        let mut calls = self.call_count.lock();
        *calls += 1;
        if *calls <= self.failures {
            Err(PipelineError::transient(format!(
                "{} failing on call {}",
                self.name, *calls
            )))
        } else {
            Ok(state)
        }
    }
}

/// A step whose execution never resolves. Used to exercise deadline races.
#[derive(Debug)]
pub struct NeverStep {
    name: String,
}

impl NeverStep {
    /// Creates a never-resolving step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Step for NeverStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _state: ResearchState) -> StepResult {
        futures::future::pending::<()>().await;
        unreachable!("pending future resolved")
    }
}

/// A language model returning a canned response.
#[derive(Debug, Clone)]
pub struct StaticLanguageModel {
    response: String,
}

impl StaticLanguageModel {
    /// Creates a model that always generates `response`.
    #[must_use]
    pub fn new(response: impl Into<String>) -> Self {
        Self { response: response.into() }
    }
}

#[async_trait]
impl LanguageModel for StaticLanguageModel {
    async fn generate(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        _temperature: f64,
    ) -> Result<String, PipelineError> {
        Ok(self.response.clone())
    }
}

/// A search provider returning canned hits.
#[derive(Debug, Clone, Default)]
pub struct StaticSearchProvider {
    hits: Vec<SearchHit>,
}

impl StaticSearchProvider {
    /// Creates a provider that always returns `hits`.
    #[must_use]
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(
        &self,
        _query: &str,
        max_results: usize,
        _filters: Option<&serde_json::Value>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}

/// A validator that accepts any value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveValidator;

impl SchemaValidator for PermissiveValidator {
    fn validate(&self, value: &serde_json::Value) -> Result<serde_json::Value, PipelineError> {
        Ok(value.clone())
    }
}
