//! Error types for the researchflow engine.
//!
//! Errors are classified by cause rather than by origin module so that the
//! retry wrapper and the executors can make policy decisions without
//! inspecting message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-checkable classification of a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid required inputs to a construct.
    Configuration,
    /// Schema mismatch or malformed selection.
    Validation,
    /// Externally classified transient failure, safe to re-attempt.
    Transient,
    /// A step's internal logic failed.
    Processing,
    /// A deadline elapsed before the protected operation resolved.
    Timeout,
    /// A bounded loop exhausted its iteration budget without success.
    MaxIterations,
    /// A tool name was not present in the registry.
    ToolNotFound,
    /// Serialization or deserialization failed.
    Serialization,
}

/// The main error type for researchflow operations.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Missing or invalid required inputs to a construct
    /// (empty track list, non-positive timeout, unknown tool, ...).
    #[error("Configuration error: {message}")]
    Configuration {
        /// What was misconfigured.
        message: String,
    },

    /// Output or selection failed validation.
    #[error("Validation error{}: {message}", step_suffix(.step))]
    Validation {
        /// The failing message.
        message: String,
        /// The step where validation failed, if known.
        step: Option<String>,
    },

    /// A transient failure from an external collaborator. Always retryable.
    #[error("Transient error: {message}")]
    Transient {
        /// The failure message.
        message: String,
    },

    /// A step's internal logic failed.
    #[error("Step '{step}' failed: {message}")]
    Processing {
        /// The failing step name.
        step: String,
        /// The failure message.
        message: String,
    },

    /// A configured deadline elapsed.
    #[error("Timed out after {elapsed_ms}ms")]
    Timeout {
        /// Milliseconds waited before giving up.
        elapsed_ms: u64,
    },

    /// A bounded loop reached its iteration cap without a passing condition.
    #[error("Max iterations ({limit}) reached without meeting the condition")]
    MaxIterations {
        /// The configured cap.
        limit: usize,
    },

    /// A selected tool was absent from the registry.
    #[error("Tool not found in registry: {name}")]
    ToolNotFound {
        /// The requested tool name.
        name: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn step_suffix(step: &Option<String>) -> String {
    step.as_ref().map(|s| format!(" in step '{s}'")).unwrap_or_default()
}

impl PipelineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a validation error without a step attribution.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), step: None }
    }

    /// Creates a validation error attributed to a step.
    #[must_use]
    pub fn validation_in(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            step: Some(step.into()),
        }
    }

    /// Creates a transient (retryable) error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient { message: message.into() }
    }

    /// Creates a processing error for a step.
    #[must_use]
    pub fn processing(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(elapsed_ms: u64) -> Self {
        Self::Timeout { elapsed_ms }
    }

    /// Creates a max-iterations error.
    #[must_use]
    pub fn max_iterations(limit: usize) -> Self {
        Self::MaxIterations { limit }
    }

    /// Creates a tool-not-found error.
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    /// Returns the machine-checkable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Processing { .. } => ErrorKind::Processing,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::MaxIterations { .. } => ErrorKind::MaxIterations,
            Self::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the retry wrapper may re-attempt the failed operation.
    ///
    /// Only transient errors carry the retryable flag; everything else
    /// propagates on first occurrence regardless of remaining budget.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the originating step name, where one is attributed.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Processing { step, .. } => Some(step),
            Self::Validation { step, .. } => step.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(PipelineError::configuration("x").kind(), ErrorKind::Configuration);
        assert_eq!(PipelineError::transient("x").kind(), ErrorKind::Transient);
        assert_eq!(PipelineError::timeout(50).kind(), ErrorKind::Timeout);
        assert_eq!(PipelineError::max_iterations(3).kind(), ErrorKind::MaxIterations);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(PipelineError::transient("flaky upstream").is_retryable());
        assert!(!PipelineError::processing("step", "bug").is_retryable());
        assert!(!PipelineError::timeout(10).is_retryable());
        assert!(!PipelineError::validation("bad shape").is_retryable());
    }

    #[test]
    fn test_step_attribution() {
        let err = PipelineError::processing("analyze", "boom");
        assert_eq!(err.step(), Some("analyze"));

        let err = PipelineError::validation_in("validate_output", "missing field");
        assert_eq!(err.step(), Some("validate_output"));
        assert!(err.to_string().contains("validate_output"));

        assert_eq!(PipelineError::timeout(1).step(), None);
    }
}
