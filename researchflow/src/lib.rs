//! # Researchflow
//!
//! A composable pipeline engine for multi-step research workflows.
//!
//! Researchflow models a research run as a typed state value threaded through
//! a list of steps, with support for:
//!
//! - **Step abstraction**: Any async transformation of the run state is a step
//! - **Retry with backoff**: Deterministic exponential backoff around transient failures
//! - **Parallel tracks**: Fork the state across concurrent tracks and merge the results
//! - **Flow control**: Evaluation gates and bounded repeat-until loops
//! - **Orchestration**: A registry-driven loop that picks the next tool dynamically
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use researchflow::prelude::*;
//!
//! let steps: Vec<Arc<dyn Step>> = vec![
//!     Arc::new(SearchStep::new(provider)),
//!     Arc::new(ExtractStep::new(extractor)),
//! ];
//!
//! let config = PipelineConfig::new().with_max_retries(2);
//! let state = execute_pipeline(ResearchState::new("query"), steps, config).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod collaborators;
pub mod errors;
pub mod events;
pub mod executor;
pub mod flow;
pub mod orchestrate;
pub mod retry;
pub mod state;
pub mod step;
pub mod testing;
pub mod track;
pub mod utils;

#[cfg(feature = "providers")]
pub mod providers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collaborators::{
        ContentExtractor, ExtractedContent, LanguageModel, SchemaValidator, SearchHit,
        SearchProvider,
    };
    pub use crate::errors::{ErrorKind, PipelineError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        execute_pipeline, ErrorHandling, PipelineConfig, SequentialExecutor,
    };
    pub use crate::flow::{evaluation_passed, EvaluateStep, Judgment, LoopPhase, RepeatUntil};
    pub use crate::orchestrate::{
        Orchestrator, RoundRobinSelector, ToolChoice, ToolRegistry, ToolSelector,
    };
    pub use crate::retry::{run_with_retry, RetryDecision, RetryPolicy};
    pub use crate::state::{
        slots, ErrorRecord, ResearchState, StateMetadata, StepExecutionRecord,
    };
    pub use crate::step::{FnStep, Step, StepResult};
    pub use crate::track::{MergeStrategy, Track, TrackResult, TrackSet};
}
