//! Protocol traits for external collaborators.
//!
//! The engine consumes these capabilities as opaque interfaces; their
//! internals (provider request shaping, prompt templates, DOM parsing) are
//! deliberately outside the core. Concrete steps call them and surface
//! failures as step failures.

use crate::errors::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A language-model invocation capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generates text for a prompt. Invocation failures surface as
    /// transient or processing errors depending on the provider.
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: f64,
    ) -> Result<String, PipelineError>;
}

/// One hit returned by a search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The result URL.
    pub url: String,
    /// The result title.
    pub title: String,
    /// A short snippet of the matching content.
    pub snippet: String,
}

/// A web-search capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Searches for a query, returning at most `max_results` hits.
    ///
    /// `filters` carries provider-specific restrictions (site, date range,
    /// ...) as an opaque value; providers may ignore it.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
        filters: Option<&serde_json::Value>,
    ) -> Result<Vec<SearchHit>, PipelineError>;
}

/// Content extracted from a fetched page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// The page title.
    pub title: String,
    /// The extracted text content, truncated to the requested length.
    pub content: String,
    /// Free-form page metadata (canonical URL, description, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A content-extraction capability.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extracts content from a URL using optional CSS selectors.
    async fn extract(
        &self,
        url: &str,
        selectors: &[String],
        max_length: usize,
    ) -> Result<ExtractedContent, PipelineError>;
}

/// The caller-supplied output contract, invoked once at the very end of a
/// top-level pipeline run against the candidate final result.
pub trait SchemaValidator: Send + Sync {
    /// Validates a value, returning it (possibly normalized) or a
    /// structured validation failure.
    fn validate(&self, value: &serde_json::Value) -> Result<serde_json::Value, PipelineError>;
}
