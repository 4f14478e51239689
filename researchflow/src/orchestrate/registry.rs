//! Registry of named tools available to the orchestration loop.

use crate::errors::PipelineError;
use crate::step::Step;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named collection of tools, each an ordinary [`Step`].
///
/// Names are kept sorted so that selectors iterating the registry see a
/// deterministic order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Step>>>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool under its own name, replacing any previous entry.
    pub fn register(&self, tool: Arc<dyn Step>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }

    /// Looks up a tool.
    ///
    /// # Errors
    ///
    /// Returns a tool-not-found error for unknown names. This is a caller
    /// configuration problem, not a transient condition.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Step>, PipelineError> {
        self.tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::tool_not_found(name))
    }

    /// Returns true when the registry knows the tool.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Returns the registered tool names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Returns true when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
