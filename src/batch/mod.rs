//! Batch dispatch.
//!
//! A [`BatchJob`] fans a list of keys out to one worker task per key, all
//! sharing a rate limiter and a deadline. The [`BatchResponse`] keeps one
//! result slot and one error slot per key, in input order.

mod composite;
mod dispatcher;

pub use composite::{CompositeQuery, DetailRecord};
pub use dispatcher::BatchDispatcher;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::decode::Decoder;
use crate::errors::{QueryError, QueryResult};
use crate::resilience::{CancelReason, RateLimitConfig, RetryConfig};
use crate::transport::RawResponse;

/// Default batch deadline.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Default base delay between attempts of one batch item.
pub const DEFAULT_BATCH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long the dispatcher keeps collecting after the deadline before it
/// abandons workers still inside a transport call.
pub const DEFAULT_ABANDON_GRACE: Duration = Duration::from_millis(25);

/// One dispatcher invocation: keys plus the limits shared by every worker.
#[derive(Debug, Clone)]
pub struct BatchJob<K> {
    keys: Vec<K>,
    rate_limit: RateLimitConfig,
    timeout: Duration,
    retry: RetryConfig,
    max_in_flight: Option<usize>,
    cancellation: Option<CancellationToken>,
    abandon_grace: Duration,
}

impl<K> BatchJob<K> {
    /// Creates a job over `keys` with default limits.
    pub fn new(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            rate_limit: RateLimitConfig::default(),
            timeout: DEFAULT_JOB_TIMEOUT,
            retry: RetryConfig::new().base_delay(DEFAULT_BATCH_RETRY_DELAY),
            max_in_flight: None,
            cancellation: None,
            abandon_grace: DEFAULT_ABANDON_GRACE,
        }
    }

    /// Sets the sustained rate in requests per second.
    pub fn qps(mut self, qps: f64) -> Self {
        self.rate_limit.qps = qps;
        self
    }

    /// Sets the rate limiter bucket size.
    pub fn burst(mut self, burst: u32) -> Self {
        self.rate_limit.burst = burst;
        self
    }

    /// Sets rate and burst together.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Sets the job deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the per-item attempt budget.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Sets the base delay of the per-item linear backoff.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    /// Caps simultaneous transport calls for this job.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Lets the caller cancel the job through `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Sets how long to keep collecting after the deadline.
    pub fn abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = grace;
        self
    }

    /// Returns the keys.
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if there are no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the job deadline.
    pub fn job_timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the rate limit configuration.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        self.rate_limit
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Checks the job limits.
    pub fn validate(&self) -> QueryResult<()> {
        self.rate_limit.validate()?;
        self.retry.validate()?;
        if self.timeout.is_zero() {
            return Err(QueryError::param_named("timeout must be greater than zero", "timeout"));
        }
        if self.max_in_flight == Some(0) {
            return Err(QueryError::param_named(
                "max_in_flight must be at least 1",
                "max_in_flight",
            ));
        }
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (Vec<K>, JobLimits) {
        (
            self.keys,
            JobLimits {
                rate_limit: self.rate_limit,
                timeout: self.timeout,
                retry: self.retry,
                max_in_flight: self.max_in_flight,
                cancellation: self.cancellation,
                abandon_grace: self.abandon_grace,
            },
        )
    }
}

/// Limits of a job once its keys have been taken.
#[derive(Debug, Clone)]
pub(crate) struct JobLimits {
    pub(crate) rate_limit: RateLimitConfig,
    pub(crate) timeout: Duration,
    pub(crate) retry: RetryConfig,
    pub(crate) max_in_flight: Option<usize>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) abandon_grace: Duration,
}

/// Ordered per-item results of a batch.
///
/// `results[i]` and `errors[i]` always belong to key `i`. A result is only
/// meaningful when the error at the same index is `None`. When the job
/// deadline expires, slots whose worker never reported stay `None` in both
/// arrays and `job_error` is set.
#[derive(Debug, Clone)]
pub struct BatchResponse<T = RawResponse> {
    /// Successful payloads by index.
    pub results: Vec<Option<T>>,
    /// Item failures by index.
    pub errors: Vec<Option<QueryError>>,
    /// Job-level deadline or cancellation error.
    pub job_error: Option<QueryError>,
}

impl<T> BatchResponse<T> {
    /// Creates a response with `len` empty slots.
    pub fn with_len(len: usize) -> Self {
        Self {
            results: (0..len).map(|_| None).collect(),
            errors: (0..len).map(|_| None).collect(),
            job_error: None,
        }
    }

    /// Creates a response in which every slot carries `error`.
    pub(crate) fn rejected(len: usize, error: QueryError) -> Self {
        Self {
            results: (0..len).map(|_| None).collect(),
            errors: (0..len).map(|_| Some(error.clone())).collect(),
            job_error: Some(error),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the result at `index` if that item succeeded.
    pub fn result(&self, index: usize) -> Option<&T> {
        match self.errors.get(index) {
            Some(None) => self.results.get(index).and_then(Option::as_ref),
            _ => None,
        }
    }

    /// Returns the error at `index`, if any.
    pub fn error(&self, index: usize) -> Option<&QueryError> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// Number of items that succeeded.
    pub fn success_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.result(i).is_some()).count()
    }

    /// Number of items that failed.
    pub fn error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    /// Returns true if no job-level error occurred.
    pub fn is_complete(&self) -> bool {
        self.job_error.is_none()
    }

    /// Returns the job-level result, discarding item data.
    pub fn job_result(&self) -> QueryResult<()> {
        match &self.job_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Converts into one result per key.
    ///
    /// Slots left empty by an expired deadline report the job error.
    pub fn into_results(self) -> Vec<QueryResult<T>> {
        let fallback = self.job_error.unwrap_or(QueryError::Cancelled {
            reason: CancelReason::Cancelled,
        });
        self.results
            .into_iter()
            .zip(self.errors)
            .map(|slot| match slot {
                (_, Some(err)) => Err(err),
                (Some(value), None) => Ok(value),
                (None, None) => Err(fallback.clone()),
            })
            .collect()
    }

    /// Maps every successful slot, turning mapping failures into item errors.
    pub fn map<U, F>(self, mut f: F) -> BatchResponse<U>
    where
        F: FnMut(T) -> QueryResult<U>,
    {
        let mut results = Vec::with_capacity(self.results.len());
        let mut errors = Vec::with_capacity(self.errors.len());

        for (result, error) in self.results.into_iter().zip(self.errors) {
            match (result, error) {
                (_, Some(err)) => {
                    results.push(None);
                    errors.push(Some(err));
                }
                (Some(value), None) => match f(value) {
                    Ok(mapped) => {
                        results.push(Some(mapped));
                        errors.push(None);
                    }
                    Err(err) => {
                        results.push(None);
                        errors.push(Some(err));
                    }
                },
                (None, None) => {
                    results.push(None);
                    errors.push(None);
                }
            }
        }

        BatchResponse {
            results,
            errors,
            job_error: self.job_error,
        }
    }

    pub(crate) fn store(&mut self, index: usize, result: QueryResult<T>) {
        if index >= self.results.len() {
            return;
        }
        match result {
            Ok(value) => self.results[index] = Some(value),
            Err(err) => self.errors[index] = Some(err),
        }
    }
}

impl BatchResponse<RawResponse> {
    /// Decodes every successful payload with `decoder`.
    ///
    /// Decode failures become `ResponseDecodeFailed` at the same index.
    pub fn decode<D: Decoder>(self, decoder: &D) -> BatchResponse<D::Output> {
        self.map(|response| decoder.decode(&response))
    }
}
