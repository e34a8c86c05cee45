//! Resilience patterns for the query client.
//!
//! Provides the token bucket limiter, retry policy, outcome classification,
//! cancellation context and the request executor built from them.

mod classifier;
mod context;
mod executor;
mod rate_limit;
mod retry;

pub use classifier::{Classifier, DefaultClassifier, Outcome, OutcomeKind};
pub use context::{CancelReason, RequestContext};
pub use executor::{Attempt, RequestExecutor};
pub use rate_limit::{RateLimitConfig, RateLimiter, DEFAULT_BURST, DEFAULT_QPS};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
