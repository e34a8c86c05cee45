//! Tests for the resilience building blocks through the public API.

use query_client::resilience::{OutcomeKind, RetryDecision};
use query_client::{
    CancelReason, Classifier, DefaultClassifier, Outcome, RateLimiter, RawResponse,
    RequestContext, RetryConfig, RetryPolicy, TransportError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_limiter_serves_waiters_in_arrival_order() {
    let limiter = Arc::new(RateLimiter::new(10.0, 1).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));
    let ctx = RequestContext::new();

    let mut handles = Vec::new();
    for i in 0..5 {
        let limiter = Arc::clone(&limiter);
        let order = Arc::clone(&order);
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire(&ctx).await.unwrap();
            order.lock().unwrap().push(i);
        }));
        // Let each task enqueue before the next one starts.
        tokio::task::yield_now().await;
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_wait_consumes_no_token() {
    let limiter = RateLimiter::new(1.0, 1).unwrap();
    assert!(limiter.try_acquire());

    let ctx = RequestContext::with_timeout(Duration::from_millis(100));
    let start = Instant::now();
    assert_eq!(
        limiter.acquire(&ctx).await,
        Err(CancelReason::DeadlineExceeded)
    );
    assert!(start.elapsed() < Duration::from_millis(200));

    // The bucket refills to a full token one second after it was drained.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(limiter.try_acquire());
}

#[test]
fn test_classification_is_idempotent() {
    let classifier = DefaultClassifier::new();
    let inputs: Vec<Result<RawResponse, TransportError>> = vec![
        Ok(RawResponse::ok(r#"{"a":1}"#)),
        Ok(RawResponse::ok("not json")),
        Ok(RawResponse::new(429, "")),
        Ok(RawResponse::new(503, "")),
        Ok(RawResponse::new(404, "")),
        Err(TransportError::Connection {
            message: "refused".to_string(),
        }),
    ];

    for input in inputs {
        let first = classifier.classify(input.clone()).kind();
        let second = classifier.classify(input).kind();
        assert_eq!(first, second);
    }
}

#[test]
fn test_retry_decision_table() {
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .max_attempts(3)
            .base_delay(Duration::from_millis(200)),
    );

    assert!(matches!(
        policy.next::<()>(1, Outcome::retryable("busy", Some(503))),
        RetryDecision::Wait(d) if d == Duration::from_millis(200)
    ));
    assert!(matches!(
        policy.next::<()>(2, Outcome::retryable("busy", Some(503))),
        RetryDecision::Wait(d) if d == Duration::from_millis(400)
    ));
    match policy.next::<()>(3, Outcome::retryable("busy", Some(503))) {
        RetryDecision::Stop(outcome) => assert_eq!(outcome.kind(), OutcomeKind::Terminal),
        RetryDecision::Wait(_) => panic!("Expected Stop at the last attempt"),
    }
    assert!(matches!(
        policy.next(1, Outcome::Success(())),
        RetryDecision::Stop(Outcome::Success(()))
    ));
}
