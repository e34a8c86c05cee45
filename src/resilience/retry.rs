//! Retry policy implementation.

use std::time::Duration;

use super::classifier::Outcome;
use crate::errors::{QueryError, QueryResult};

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for linear backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay` before the next try.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Checks that at least one attempt is allowed.
    pub fn validate(&self) -> QueryResult<()> {
        if self.max_attempts == 0 {
            return Err(QueryError::param_named(
                "max_attempts must be at least 1",
                "max_attempts",
            ));
        }
        Ok(())
    }
}

/// What to do after an attempt.
#[derive(Debug, Clone)]
pub enum RetryDecision<T> {
    /// Stop and report this outcome. Never [`Outcome::Retryable`].
    Stop(Outcome<T>),
    /// Wait this long, then try again.
    Wait(Duration),
}

/// Linear backoff retry policy.
///
/// Deterministic: no jitter, so the same sequence of outcomes always yields
/// the same sequence of decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the policy configuration.
    pub fn config(&self) -> RetryConfig {
        self.config
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay after the given (1-based) attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.config.base_delay.saturating_mul(attempt)
    }

    /// Decides what follows attempt number `attempt` (1-based).
    pub fn next<T>(&self, attempt: u32, outcome: Outcome<T>) -> RetryDecision<T> {
        match outcome {
            Outcome::Retryable { reason, status } => {
                if attempt < self.config.max_attempts {
                    RetryDecision::Wait(self.backoff(attempt))
                } else {
                    RetryDecision::Stop(Outcome::Terminal(exhausted(reason, status, attempt)))
                }
            }
            Outcome::Terminal(err) => {
                RetryDecision::Stop(Outcome::Terminal(err.with_attempts(attempt)))
            }
            success @ Outcome::Success(_) => RetryDecision::Stop(success),
        }
    }
}

fn exhausted(reason: String, status: Option<u16>, attempts: u32) -> QueryError {
    let message = if status == Some(429) {
        format!("api quota exceeded, retries exhausted: {}", reason)
    } else {
        format!("retries exhausted: {}", reason)
    };
    QueryError::request_failed(message, status, attempts)
}
