//! HTTP-backed implementations of the collaborator traits.
//!
//! Enabled by the `providers` feature. The engine itself never depends on
//! this module; concrete steps inject these implementations through the
//! trait seams in [`crate::collaborators`].

mod extract;
mod search;

pub use extract::HttpContentExtractor;
pub use search::HttpSearchProvider;

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the HTTP providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Maximum response size in bytes.
    #[serde(default = "default_max_size")]
    pub max_response_size: usize,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_user_agent() -> String {
    format!("researchflow/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_size() -> usize {
    10 * 1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            max_response_size: default_max_size(),
        }
    }
}

impl HttpConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, PipelineError> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(self.timeout_seconds))
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|err| {
                PipelineError::configuration(format!("failed to build HTTP client: {err}"))
            })
    }
}

/// Sends a prepared request and returns the body text, mapping transport
/// and status failures onto pipeline errors. Server-side and rate-limit
/// statuses are retryable; client errors are not.
pub(crate) async fn fetch_text(
    request: reqwest::RequestBuilder,
    max_size: usize,
) -> Result<String, PipelineError> {
    let response = request
        .send()
        .await
        .map_err(|err| PipelineError::transient(format!("request failed: {err}")))?;

    let status = response.status();
    let url = response.url().clone();
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PipelineError::transient(format!(
            "{url} returned {status}"
        )));
    }
    if !status.is_success() {
        return Err(PipelineError::processing(
            "http_fetch",
            format!("{url} returned {status}"),
        ));
    }

    let mut text = response
        .text()
        .await
        .map_err(|err| PipelineError::transient(format!("reading body of {url} failed: {err}")))?;
    if text.len() > max_size {
        let mut cut = max_size;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    Ok(text)
}
