//! Bounded retry with deterministic exponential backoff.
//!
//! The backoff sequence for a policy with base delay `d` and factor `b` is
//! `d, d*b, d*b^2, ...`. No jitter is added: given the same inputs the
//! delays are fully reproducible, which the executors rely on for
//! deterministic timing under paused test clocks.

use crate::errors::PipelineError;
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt. A policy with
    /// `max_retries = m` issues at most `m + 1` invocations.
    pub max_retries: usize,
    /// Base delay before the first retry.
    pub retry_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables retries entirely.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the maximum retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Returns the delay preceding retry number `retry` (1-indexed):
    /// `retry_delay * backoff_factor^(retry - 1)`.
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let factor = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        self.retry_delay.mul_f64(factor)
    }

    /// Decides what to do after a failed attempt.
    ///
    /// `attempts` is the number of invocations issued so far (>= 1).
    #[must_use]
    pub fn decide(&self, attempts: usize, retryable: bool) -> RetryDecision {
        if !retryable {
            return RetryDecision::NotRetryable;
        }
        if attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.delay_for(attempts))
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Budget exhausted, give up.
    GiveUp,
    /// The error is not retryable; propagate regardless of budget.
    NotRetryable,
}

/// Executes an operation under a retry policy.
///
/// `is_retryable` classifies errors; the default classification used across
/// the engine is [`PipelineError::is_retryable`]. Non-retryable errors
/// propagate on first occurrence.
pub async fn run_with_retry<T, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
    P: Fn(&PipelineError) -> bool,
{
    let mut attempts = 0usize;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.decide(attempts, is_retryable(&err)) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => return Err(err),
            },
        }
    }
}
