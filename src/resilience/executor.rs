//! Single-request execution pipeline.
//!
//! One logical request runs as: in-flight permit, rate limiter token,
//! transport call, classification, retry decision. Every attempt consumes a
//! token, so retries are rate limited like first tries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::instrument;

use super::classifier::{Classifier, Outcome, OutcomeKind};
use super::context::RequestContext;
use super::rate_limit::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy};
use crate::errors::QueryError;
use crate::observability::{MetricsCollector, NoopMetricsCollector};
use crate::transport::{QueryRequest, Transport};

/// Record of one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Attempt number, starting at 1.
    pub number: u32,
    /// Time spent in the transport call.
    pub elapsed: Duration,
    /// How the attempt was classified.
    pub outcome: OutcomeKind,
    /// Status code of a failed attempt, if any.
    pub status: Option<u16>,
}

/// Drives requests through admission, transport and retry.
///
/// Cheap to clone; clones share the limiter, transport and in-flight cap.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn Classifier>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    in_flight: Option<Arc<Semaphore>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl RequestExecutor {
    /// Creates an executor.
    pub fn new(
        transport: Arc<dyn Transport>,
        classifier: Arc<dyn Classifier>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            classifier,
            limiter,
            policy,
            in_flight: None,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Caps the number of simultaneous transport calls.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.in_flight = Some(Arc::new(Semaphore::new(max.max(1))));
        self
    }

    /// Shares an existing in-flight cap.
    pub fn with_in_flight_semaphore(mut self, semaphore: Option<Arc<Semaphore>>) -> Self {
        self.in_flight = semaphore;
        self
    }

    /// Sets the metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns a copy using a different limiter and retry policy.
    ///
    /// Transport, classifier, in-flight cap and metrics stay shared.
    pub fn with_limits(&self, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            limiter,
            policy,
            ..self.clone()
        }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns the rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Runs one logical request to a final outcome.
    ///
    /// The returned outcome is never [`Outcome::Retryable`].
    pub async fn execute(&self, request: &QueryRequest, ctx: &RequestContext) -> Outcome {
        self.execute_traced(request, ctx).await.0
    }

    /// Like [`execute`](Self::execute), also returning every attempt made.
    #[instrument(
        skip_all,
        fields(target = %request.target, max_attempts = self.policy.max_attempts())
    )]
    pub async fn execute_traced(
        &self,
        request: &QueryRequest,
        ctx: &RequestContext,
    ) -> (Outcome, Vec<Attempt>) {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let outcome = self.run(request, ctx, &mut attempts).await;

        let success = outcome.is_success();
        self.metrics.record_request(success, started.elapsed());
        if let Outcome::Terminal(err) = &outcome {
            self.metrics.record_error(err);
            tracing::debug!(error = %err, attempts = attempts.len(), "Request failed");
        }

        (outcome, attempts)
    }

    async fn run(
        &self,
        request: &QueryRequest,
        ctx: &RequestContext,
        attempts: &mut Vec<Attempt>,
    ) -> Outcome {
        let mut number = 0u32;

        loop {
            number += 1;

            // Never start a new attempt once the context is done.
            if let Some(reason) = ctx.err() {
                return Outcome::Terminal(QueryError::Cancelled { reason });
            }

            let permit = match &self.in_flight {
                Some(semaphore) => tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
                    reason = ctx.cancelled() => {
                        return Outcome::Terminal(QueryError::Cancelled { reason });
                    }
                },
                None => None,
            };

            let wait_started = Instant::now();
            if let Err(reason) = self.limiter.acquire(ctx).await {
                tracing::warn!(attempt = number, %reason, "Rate limiter wait aborted");
                return Outcome::Terminal(QueryError::RateLimitExceeded {
                    message: format!("token wait aborted: {}", reason),
                    attempt: number,
                });
            }
            let waited = wait_started.elapsed();
            if !waited.is_zero() {
                self.metrics.record_rate_limit_wait(waited);
            }

            let call_started = Instant::now();
            let result = self.transport.send(request.clone()).await;
            let elapsed = call_started.elapsed();
            drop(permit);

            let outcome = self.classifier.classify(result);
            let attempt = Attempt {
                number,
                elapsed,
                outcome: outcome.kind(),
                status: outcome.status(),
            };
            self.metrics.record_attempt(attempt.outcome, elapsed);
            attempts.push(attempt);

            match self.policy.next(number, outcome) {
                RetryDecision::Stop(outcome) => return outcome,
                RetryDecision::Wait(delay) => {
                    self.metrics.record_retry(delay);
                    tracing::info!(
                        attempt = number,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        status = ?attempt.status,
                        "Retrying after error"
                    );
                    if let Err(reason) = ctx.sleep(delay).await {
                        return Outcome::Terminal(QueryError::Cancelled { reason });
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("limiter", &self.limiter)
            .field("policy", &self.policy)
            .field(
                "max_in_flight",
                &self.in_flight.as_ref().map(|s| s.available_permits()),
            )
            .finish_non_exhaustive()
    }
}
