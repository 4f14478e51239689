//! The research state threaded through every step.
//!
//! A state value is created once per top-level pipeline invocation and
//! functionally updated: each step consumes its incoming state and returns a
//! new one. Move semantics make the no-aliasing convention structural; the
//! engine clones a state only when it needs a pre-attempt copy for retries
//! or an isolated scope for a track.

use crate::errors::{ErrorKind, PipelineError};
use crate::utils::{self, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Well-known scratch slots used by cooperating steps.
///
/// Slot shape is a convention between steps, not enforced by the engine.
pub mod slots {
    /// Search provider hits.
    pub const SEARCH_RESULTS: &str = "search_results";
    /// Extracted page content.
    pub const EXTRACTED_CONTENT: &str = "extracted_content";
    /// Fact-check verdicts.
    pub const FACT_CHECKS: &str = "fact_checks";
    /// Synthesized analysis.
    pub const ANALYSIS: &str = "analysis";
    /// Merged parallel-track output.
    pub const TRACKS: &str = "tracks";
    /// Recorded evaluations keyed by evaluation name.
    pub const EVALUATIONS: &str = "evaluations";
    /// Bounded-loop outcomes keyed by loop name.
    pub const LOOPS: &str = "loops";
    /// Orchestration iteration log.
    pub const ORCHESTRATION_LOG: &str = "orchestration_log";
    /// Orchestration terminal summary.
    pub const ORCHESTRATION: &str = "orchestration";
}

/// One record per step attempt, including retried attempts.
///
/// Records are append-only and never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// The step name.
    pub step: String,
    /// When the attempt started.
    pub started_at: Timestamp,
    /// When the attempt finished.
    pub finished_at: Timestamp,
    /// Whether the attempt succeeded.
    pub success: bool,
    /// The captured error message, for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An entry in the append-only error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The step the error is attributed to, where known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Machine-checkable classification.
    pub kind: ErrorKind,
    /// Whether the error was classified as retryable.
    pub retryable: bool,
    /// When the error was recorded.
    pub timestamp: Timestamp,
}

impl ErrorRecord {
    /// Builds a record from a pipeline error, attributing it to `step` when
    /// the error itself carries no attribution.
    #[must_use]
    pub fn from_error(step: &str, err: &PipelineError) -> Self {
        Self {
            step: Some(err.step().unwrap_or(step).to_string()),
            message: err.to_string(),
            kind: err.kind(),
            retryable: err.is_retryable(),
            timestamp: utils::now(),
        }
    }
}

/// Execution telemetry and cross-step coordination flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    /// Identifier of this pipeline run.
    pub run_id: Uuid,
    /// When the run started.
    pub start_time: Timestamp,
    /// When the run halted, set exactly once by `finalize`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    /// One record per step attempt issued so far.
    pub step_history: Vec<StepExecutionRecord>,
    /// Highest confidence recorded by any evaluation so far.
    pub confidence_score: f64,
    /// Name of the track currently executing this state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_track: Option<String>,
    /// Free-form envelope for anything else steps want to coordinate on.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StateMetadata {
    fn new() -> Self {
        Self {
            run_id: utils::generate_run_id(),
            start_time: utils::now(),
            end_time: None,
            step_history: Vec::new(),
            confidence_score: 0.0,
            current_track: None,
            extra: HashMap::new(),
        }
    }
}

/// The mutable-by-convention aggregate passed between steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    /// The original request. Immutable after creation.
    query: String,
    /// Free-form scratch space; steps read/write named slots.
    pub data: HashMap<String, serde_json::Value>,
    /// Ordered accumulation of caller-visible partial outputs.
    /// The last entry is the candidate final result.
    results: Vec<serde_json::Value>,
    /// Append-only log of non-fatal and fatal failures.
    errors: Vec<ErrorRecord>,
    /// Execution telemetry.
    pub metadata: StateMetadata,
}

impl ResearchState {
    /// Creates a fresh state for a new pipeline run, setting `start_time`.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            data: HashMap::new(),
            results: Vec::new(),
            errors: Vec::new(),
            metadata: StateMetadata::new(),
        }
    }

    /// Returns the original request.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Reads a scratch slot.
    #[must_use]
    pub fn get(&self, slot: &str) -> Option<&serde_json::Value> {
        self.data.get(slot)
    }

    /// Writes a scratch slot, replacing any previous value.
    pub fn set(&mut self, slot: impl Into<String>, value: serde_json::Value) {
        self.data.insert(slot.into(), value);
    }

    /// Appends a caller-visible partial output.
    pub fn push_result(&mut self, value: serde_json::Value) {
        self.results.push(value);
    }

    /// Returns all accumulated results in order.
    #[must_use]
    pub fn results(&self) -> &[serde_json::Value] {
        &self.results
    }

    /// Returns the candidate final result, the last accumulated output.
    #[must_use]
    pub fn candidate_result(&self) -> Option<&serde_json::Value> {
        self.results.last()
    }

    /// Appends to the error log.
    pub fn push_error(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    /// Returns the error log.
    #[must_use]
    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Returns true if any error has been recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Appends a step attempt record.
    pub fn record_attempt(&mut self, record: StepExecutionRecord) {
        self.metadata.step_history.push(record);
    }

    /// Raises the run confidence to the max of its prior value and `score`.
    pub fn raise_confidence(&mut self, score: f64) {
        if score > self.metadata.confidence_score {
            self.metadata.confidence_score = score;
        }
    }

    /// Marks the run as halted. The first call wins; later calls are no-ops
    /// so a timed-out run cannot have its end time overwritten by a late
    /// finisher.
    pub fn finalize(&mut self) {
        if self.metadata.end_time.is_none() {
            self.metadata.end_time = Some(utils::now());
        }
    }

    /// Returns true once the run has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.metadata.end_time.is_some()
    }

    /// Derives a child state for a track.
    ///
    /// The child shares the query but gets its own result/error logs. With
    /// `isolate` the scratch space starts empty; otherwise it is a copy of
    /// the parent's.
    #[must_use]
    pub fn fork_for_track(&self, track: &str, isolate: bool) -> Self {
        let mut child = Self {
            query: self.query.clone(),
            data: if isolate { HashMap::new() } else { self.data.clone() },
            results: Vec::new(),
            errors: Vec::new(),
            metadata: StateMetadata::new(),
        };
        child.metadata.current_track = Some(track.to_string());
        child
    }
}
