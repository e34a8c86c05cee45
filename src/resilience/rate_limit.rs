//! Token bucket rate limiter.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::context::{CancelReason, RequestContext};
use crate::errors::{QueryError, QueryResult};

/// Default sustained rate in requests per second.
pub const DEFAULT_QPS: f64 = 10.0;

/// Default bucket size.
pub const DEFAULT_BURST: u32 = 20;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub qps: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            qps: DEFAULT_QPS,
            burst: DEFAULT_BURST,
        }
    }
}

impl RateLimitConfig {
    /// Creates a configuration with the given rate and burst.
    pub fn new(qps: f64, burst: u32) -> Self {
        Self { qps, burst }
    }

    /// Checks that the rate is positive and finite and the burst is at least one.
    pub fn validate(&self) -> QueryResult<()> {
        if !self.qps.is_finite() || self.qps <= 0.0 {
            return Err(QueryError::param_named(
                format!("qps must be a positive number, got {}", self.qps),
                "qps",
            ));
        }
        if self.burst == 0 {
            return Err(QueryError::param_named("burst must be at least 1", "burst"));
        }
        Ok(())
    }
}

/// Token bucket state.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64, // tokens per second
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            tokens: f64::from(capacity),
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        // Absorbs float drift after sleeping exactly the computed wait.
        if self.tokens >= 1.0 - 1e-9 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 - 1e-9 {
            Duration::ZERO
        } else {
            // Very slow rates can exceed what a Duration holds.
            Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate)
                .unwrap_or(Duration::MAX)
        }
    }
}

/// Token bucket admission gate shared by every request of one engine.
///
/// The bucket starts full. Waiters are served in arrival order: the bucket
/// lock is a fair queue and the head of the queue sleeps while holding it.
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Creates a limiter refilling at `qps` tokens per second up to `burst`.
    pub fn new(qps: f64, burst: u32) -> QueryResult<Self> {
        Self::from_config(RateLimitConfig::new(qps, burst))
    }

    /// Creates a limiter from a configuration.
    pub fn from_config(config: RateLimitConfig) -> QueryResult<Self> {
        config.validate()?;
        Ok(Self {
            bucket: Mutex::new(TokenBucket::new(config.burst, config.qps)),
            config,
        })
    }

    /// Returns the limiter configuration.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Waits for one token.
    ///
    /// Returns the context's reason if it finishes first; no token is consumed
    /// in that case.
    pub async fn acquire(&self, ctx: &RequestContext) -> Result<(), CancelReason> {
        if let Some(reason) = ctx.err() {
            return Err(reason);
        }

        let mut bucket = tokio::select! {
            guard = self.bucket.lock() => guard,
            reason = ctx.cancelled() => return Err(reason),
        };

        loop {
            let wait = bucket.time_until_available();
            if wait.is_zero() && bucket.try_consume() {
                return Ok(());
            }
            ctx.sleep(wait).await?;
        }
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        match self.bucket.try_lock() {
            Ok(mut bucket) => bucket.try_consume(),
            Err(_) => false,
        }
    }

    /// Returns the number of tokens currently in the bucket.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill();
        bucket.tokens
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("qps", &self.config.qps)
            .field("burst", &self.config.burst)
            .finish_non_exhaustive()
    }
}
