//! Tool-selection strategies for the orchestration loop.
//!
//! Which tool runs next is a pluggable capability: implementations range
//! from a deterministic round-robin (useful as a test double) to a rule
//! engine or an external model call. The loop's control-flow contract never
//! depends on the decision technology.

use crate::errors::PipelineError;
use crate::state::ResearchState;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A selected tool plus the selector's stated reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoice {
    /// The chosen tool name.
    pub tool: String,
    /// Why the selector chose it.
    pub reasoning: String,
}

/// Strategy deciding which tool to run next.
#[async_trait]
pub trait ToolSelector: Send + Sync {
    /// Selects the next tool given the current state and the registered
    /// tool names (sorted).
    async fn select_next(
        &self,
        state: &ResearchState,
        tools: &[String],
    ) -> Result<ToolChoice, PipelineError>;
}

/// Deterministic selector cycling through the registry in name order.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursor: Mutex<usize>,
}

impl RoundRobinSelector {
    /// Creates a selector starting at the first tool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolSelector for RoundRobinSelector {
    async fn select_next(
        &self,
        _state: &ResearchState,
        tools: &[String],
    ) -> Result<ToolChoice, PipelineError> {
        if tools.is_empty() {
            return Err(PipelineError::configuration(
                "cannot select a tool from an empty registry",
            ));
        }

        let mut cursor = self.cursor.lock();
        let index = *cursor % tools.len();
        *cursor += 1;

        Ok(ToolChoice {
            tool: tools[index].clone(),
            reasoning: format!("round-robin position {index}"),
        })
    }
}
