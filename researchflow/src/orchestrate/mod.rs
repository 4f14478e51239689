//! Dynamic, registry-based tool orchestration.
//!
//! Each iteration an injected selector picks one tool from the registry,
//! the tool executes as an ordinary step, and an exit predicate decides
//! whether to stop early. The loop is strictly sequential and bounded.

mod registry;
mod selector;

pub use registry::ToolRegistry;
pub use selector::{RoundRobinSelector, ToolChoice, ToolSelector};

use crate::errors::PipelineError;
use crate::events::{EventSink, LoggingEventSink};
use crate::state::{slots, ErrorRecord, ResearchState};
use crate::step::{Step, StepResult};
use crate::utils;
use async_trait::async_trait;
use std::sync::Arc;

/// Predicate consulted after each successful tool execution. Errors here
/// indicate a caller bug and are always fatal.
pub type ExitCriteria = Arc<dyn Fn(&ResearchState) -> Result<bool, PipelineError> + Send + Sync>;

/// A bounded loop that repeatedly selects and executes one tool.
///
/// Implements [`Step`], so an orchestration loop can sit anywhere inside a
/// pipeline.
pub struct Orchestrator {
    name: String,
    selector: Arc<dyn ToolSelector>,
    registry: Arc<ToolRegistry>,
    max_iterations: usize,
    exit_criteria: Option<ExitCriteria>,
    continue_on_error: bool,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("max_iterations", &self.max_iterations)
            .field("continue_on_error", &self.continue_on_error)
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestration loop.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        selector: Arc<dyn ToolSelector>,
        registry: Arc<ToolRegistry>,
        max_iterations: usize,
    ) -> Self {
        Self {
            name: name.into(),
            selector,
            registry,
            max_iterations,
            exit_criteria: None,
            continue_on_error: false,
            event_sink: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Sets the early-exit predicate.
    #[must_use]
    pub fn with_exit_criteria<F>(mut self, criteria: F) -> Self
    where
        F: Fn(&ResearchState) -> Result<bool, PipelineError> + Send + Sync + 'static,
    {
        self.exit_criteria = Some(Arc::new(criteria));
        self
    }

    /// Skips failed iterations (including unknown tool names) instead of
    /// aborting the loop.
    #[must_use]
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    fn log_iteration(
        state: &mut ResearchState,
        iteration: usize,
        choice: &ToolChoice,
        error: Option<&PipelineError>,
    ) {
        let mut entry = serde_json::json!({
            "iteration": iteration,
            "tool_chosen": choice.tool,
            "reasoning": choice.reasoning,
            "timestamp": utils::iso_timestamp(),
        });
        if let (Some(err), serde_json::Value::Object(map)) = (error, &mut entry) {
            map.insert("error".to_string(), serde_json::json!(err.to_string()));
        }

        let log = state
            .data
            .entry(slots::ORCHESTRATION_LOG.to_string())
            .or_insert_with(|| serde_json::json!([]));
        if let serde_json::Value::Array(entries) = log {
            entries.push(entry);
        }
    }
}

#[async_trait]
impl Step for Orchestrator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, mut state: ResearchState) -> StepResult {
        if self.registry.is_empty() {
            return Err(PipelineError::configuration(
                "orchestration requires at least one registered tool",
            ));
        }
        if self.max_iterations == 0 {
            return Err(PipelineError::configuration(
                "orchestration requires max_iterations >= 1",
            ));
        }

        let tool_names = self.registry.names();
        let mut tools_used: Vec<String> = Vec::new();
        let mut failed_iterations = 0usize;
        let mut iterations = 0usize;

        while iterations < self.max_iterations {
            iterations += 1;

            // Selection failures are malformed decisions, always fatal.
            let choice = self.selector.select_next(&state, &tool_names).await?;

            self.event_sink.try_emit(
                "orchestration.iteration",
                Some(serde_json::json!({
                    "loop": self.name,
                    "iteration": iterations,
                    "tool": choice.tool,
                })),
            );

            let tool = match self.registry.get(&choice.tool) {
                Ok(tool) => tool,
                Err(err) => {
                    Self::log_iteration(&mut state, iterations, &choice, Some(&err));
                    if self.continue_on_error {
                        failed_iterations += 1;
                        continue;
                    }
                    return Err(err);
                }
            };

            match tool.execute(state.clone()).await {
                Ok(next) => {
                    state = next;
                    Self::log_iteration(&mut state, iterations, &choice, None);
                    if !tools_used.contains(&choice.tool) {
                        tools_used.push(choice.tool.clone());
                    }
                }
                Err(err) => {
                    Self::log_iteration(&mut state, iterations, &choice, Some(&err));
                    if self.continue_on_error {
                        failed_iterations += 1;
                        state.push_error(ErrorRecord::from_error(&choice.tool, &err));
                        continue;
                    }
                    return Err(err);
                }
            }

            if let Some(criteria) = &self.exit_criteria {
                // Exit-criteria errors are caller bugs, never skipped.
                if criteria(&state)? {
                    tracing::debug!(
                        loop_name = self.name.as_str(),
                        iteration = iterations,
                        "Exit criteria met"
                    );
                    break;
                }
            }
        }

        let success_rate = if iterations == 0 {
            0.0
        } else {
            (iterations - failed_iterations) as f64 / iterations as f64
        };
        let confidence = state.metadata.confidence_score * success_rate;

        let summary = serde_json::json!({
            "summary": format!(
                "{} ran {} iteration(s) using {} tool(s)",
                self.name, iterations, tools_used.len()
            ),
            "tools_used": tools_used,
            "success_rate": success_rate,
            "confidence": confidence,
        });
        state.set(slots::ORCHESTRATION, summary.clone());
        state.push_result(summary);

        Ok(state)
    }
}
