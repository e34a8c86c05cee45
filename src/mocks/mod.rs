//! Mock implementations for testing.
//!
//! Provides a scripted transport so the executor and dispatcher can be
//! tested without making real network calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::transport::{QueryRequest, RawResponse, Transport, TransportError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this response.
    Response(RawResponse),
    /// Fail with this transport error.
    Error(TransportError),
}

/// Mock transport for testing.
///
/// Replies are scripted per target: each call pops the next queued reply for
/// its target and falls back to the default reply once the queue is empty.
/// Without a default, unscripted calls receive a `500`.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
    default_reply: Option<MockReply>,
    delay: Duration,
    target_delays: HashMap<String, Duration>,
    requests: Mutex<Vec<QueryRequest>>,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reply used when a target has nothing queued.
    pub fn with_default(mut self, response: RawResponse) -> Self {
        self.default_reply = Some(MockReply::Response(response));
        self
    }

    /// Sets a transport error as the default reply.
    pub fn with_default_error(mut self, error: TransportError) -> Self {
        self.default_reply = Some(MockReply::Error(error));
        self
    }

    /// Queues a response for a target.
    pub fn with_response(self, target: impl Into<String>, response: RawResponse) -> Self {
        self.queue(target, MockReply::Response(response));
        self
    }

    /// Queues a transport error for a target.
    pub fn with_error(self, target: impl Into<String>, error: TransportError) -> Self {
        self.queue(target, MockReply::Error(error));
        self
    }

    /// Delays every call by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delays calls to one target by `delay`, overriding the global delay.
    pub fn with_target_delay(mut self, target: impl Into<String>, delay: Duration) -> Self {
        self.target_delays.insert(target.into(), delay);
        self
    }

    /// Queues a reply for a target.
    pub fn queue(&self, target: impl Into<String>, reply: MockReply) {
        lock(&self.scripts)
            .entry(target.into())
            .or_default()
            .push_back(reply);
    }

    /// Gets all recorded requests, in call order.
    pub fn requests(&self) -> Vec<QueryRequest> {
        lock(&self.requests).clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<QueryRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Returns the number of calls made.
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Returns the number of calls made to one target.
    pub fn calls_for(&self, target: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.target == target)
            .count()
    }

    /// Highest number of calls observed in progress at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn next_reply(&self, target: &str) -> MockReply {
        let scripted = lock(&self.scripts)
            .get_mut(target)
            .and_then(VecDeque::pop_front);

        scripted
            .or_else(|| self.default_reply.clone())
            .unwrap_or_else(|| {
                let body = r#"{"error":"no mock response configured"}"#;
                MockReply::Response(RawResponse::new(500, body))
            })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: QueryRequest) -> Result<RawResponse, TransportError> {
        let target = request.target.clone();
        lock(&self.requests).push(request);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let delay = self.target_delays.get(&target).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(&target) {
            MockReply::Response(response) => Ok(response),
            MockReply::Error(error) => Err(error),
        }
    }
}
