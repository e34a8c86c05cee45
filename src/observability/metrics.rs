//! Metrics collection for the query client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::errors::QueryError;
use crate::resilience::OutcomeKind;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records one transport attempt and how it was classified.
    fn record_attempt(&self, outcome: OutcomeKind, duration: Duration);

    /// Records a scheduled retry.
    fn record_retry(&self, delay: Duration);

    /// Records time spent waiting for a rate limiter token.
    fn record_rate_limit_wait(&self, waited: Duration);

    /// Records the final result of a logical request.
    fn record_request(&self, success: bool, duration: Duration);

    /// Records an error by kind.
    fn record_error(&self, error: &QueryError);

    /// Gets current metrics.
    fn get_metrics(&self) -> RequestMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Request metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetrics {
    /// Logical requests completed.
    pub total_requests: u64,
    /// Logical requests that succeeded.
    pub successful_requests: u64,
    /// Logical requests that failed.
    pub failed_requests: u64,
    /// Transport attempts made.
    pub total_attempts: u64,
    /// Attempts classified as retryable.
    pub retryable_attempts: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Token acquisitions that had to wait.
    pub rate_limit_waits: u64,
    /// Total milliseconds spent waiting for tokens.
    pub rate_limit_wait_ms: u64,
    /// Total latency of logical requests in milliseconds.
    pub total_latency_ms: u64,
    /// Error counts by kind.
    pub errors: HashMap<String, u64>,
}

impl RequestMetrics {
    /// Calculates average latency in milliseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_requests as f64
        }
    }

    /// Calculates success rate as a percentage.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            100.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Default metrics collector backed by atomics.
#[derive(Debug, Default)]
pub struct DefaultMetricsCollector {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_attempts: AtomicU64,
    retryable_attempts: AtomicU64,
    retries: AtomicU64,
    rate_limit_waits: AtomicU64,
    rate_limit_wait_ms: AtomicU64,
    total_latency_ms: AtomicU64,
    errors: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_attempt(&self, outcome: OutcomeKind, _duration: Duration) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        if outcome == OutcomeKind::Retryable {
            self.retryable_attempts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_retry(&self, _delay: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rate_limit_wait(&self, waited: Duration) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        self.rate_limit_wait_ms
            .fetch_add(millis(waited), Ordering::Relaxed);
    }

    fn record_request(&self, success: bool, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms
            .fetch_add(millis(duration), Ordering::Relaxed);
    }

    fn record_error(&self, error: &QueryError) {
        if let Ok(mut errors) = self.errors.write() {
            *errors.entry(error.kind().to_string()).or_insert(0) += 1;
        }
    }

    fn get_metrics(&self) -> RequestMetrics {
        RequestMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            retryable_attempts: self.retryable_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rate_limit_waits: self.rate_limit_waits.load(Ordering::Relaxed),
            rate_limit_wait_ms: self.rate_limit_wait_ms.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            errors: self.errors.read().map(|e| e.clone()).unwrap_or_default(),
        }
    }

    fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.total_attempts.store(0, Ordering::Relaxed);
        self.retryable_attempts.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.rate_limit_waits.store(0, Ordering::Relaxed);
        self.rate_limit_wait_ms.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        if let Ok(mut errors) = self.errors.write() {
            errors.clear();
        }
    }
}

/// Collector that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_attempt(&self, _outcome: OutcomeKind, _duration: Duration) {}
    fn record_retry(&self, _delay: Duration) {}
    fn record_rate_limit_wait(&self, _waited: Duration) {}
    fn record_request(&self, _success: bool, _duration: Duration) {}
    fn record_error(&self, _error: &QueryError) {}

    fn get_metrics(&self) -> RequestMetrics {
        RequestMetrics::default()
    }

    fn reset(&self) {}
}
