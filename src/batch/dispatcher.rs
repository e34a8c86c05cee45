//! Batch dispatcher.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::composite::{run_composite, CompositeQuery, DetailRecord};
use super::{BatchJob, BatchResponse};
use crate::errors::{QueryError, QueryResult};
use crate::resilience::{CancelReason, RateLimiter, RequestContext, RequestExecutor, RetryPolicy};
use crate::transport::{QueryRequest, RawResponse};

/// Runs batch jobs on top of a [`RequestExecutor`].
///
/// Each job gets its own rate limiter and deadline; the transport, classifier
/// and metrics of the executor are shared across jobs.
#[derive(Debug, Clone)]
pub struct BatchDispatcher {
    executor: RequestExecutor,
}

impl BatchDispatcher {
    /// Creates a dispatcher.
    pub fn new(executor: RequestExecutor) -> Self {
        Self { executor }
    }

    /// Returns the base executor.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Runs one request per key.
    ///
    /// `build` turns a key into its request; a build failure becomes that
    /// item's error without any transport call.
    pub async fn dispatch<K, F>(&self, job: BatchJob<K>, build: F) -> BatchResponse<RawResponse>
    where
        F: Fn(&K) -> QueryResult<QueryRequest>,
    {
        self.dispatch_with(job, |executor, key, ctx| {
            let request = build(&key);
            async move {
                let request = request?;
                executor.execute(&request, &ctx).await.into_result()
            }
        })
        .await
    }

    /// Runs a composite detail query per key.
    ///
    /// The primary request of each key is fatal to that item; secondary
    /// failures are kept in [`DetailRecord::partial_errors`].
    pub async fn dispatch_detail<K, F>(
        &self,
        job: BatchJob<K>,
        build: F,
    ) -> BatchResponse<DetailRecord>
    where
        F: Fn(&K) -> QueryResult<CompositeQuery>,
    {
        self.dispatch_with(job, |executor, key, ctx| {
            let query = build(&key);
            async move { run_composite(&executor, query?, &ctx).await }
        })
        .await
    }

    /// Runs an arbitrary unit of work per key.
    ///
    /// `work` receives an executor bound to the job's limiter and retry
    /// budget, the key, and the shared job context.
    pub async fn dispatch_with<K, T, W, Fut>(&self, job: BatchJob<K>, work: W) -> BatchResponse<T>
    where
        T: Send + 'static,
        W: FnMut(RequestExecutor, K, RequestContext) -> Fut,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let span = tracing::info_span!("batch", job_id = %Uuid::new_v4(), total = job.len());
        self.run(job, work).instrument(span).await
    }

    async fn run<K, T, W, Fut>(&self, job: BatchJob<K>, mut work: W) -> BatchResponse<T>
    where
        T: Send + 'static,
        W: FnMut(RequestExecutor, K, RequestContext) -> Fut,
        Fut: Future<Output = QueryResult<T>> + Send + 'static,
    {
        let total = job.len();
        if total == 0 {
            return BatchResponse::with_len(0);
        }
        if let Err(err) = job.validate() {
            tracing::warn!(error = %err, "Rejected batch job");
            return BatchResponse::rejected(total, err);
        }

        let (keys, limits) = job.into_parts();
        let limiter = match RateLimiter::from_config(limits.rate_limit) {
            Ok(limiter) => Arc::new(limiter),
            Err(err) => return BatchResponse::rejected(total, err),
        };
        let mut executor = self
            .executor
            .with_limits(limiter, RetryPolicy::new(limits.retry));
        if let Some(max) = limits.max_in_flight {
            executor = executor.with_max_in_flight(max);
        }

        let base = match &limits.cancellation {
            Some(token) => RequestContext::from_token(token.child_token()),
            None => RequestContext::new(),
        };
        let ctx = base.child_with_timeout(limits.timeout);
        // Stops abandoned workers, also when the caller drops this future.
        let _cancel_on_exit = ctx.drop_guard();

        tracing::info!(
            qps = limits.rate_limit.qps,
            burst = limits.rate_limit.burst,
            timeout_ms = millis(limits.timeout),
            max_attempts = limits.retry.max_attempts,
            "Dispatching batch"
        );

        let mut workers = FuturesUnordered::new();
        for (index, key) in keys.into_iter().enumerate() {
            let unit = work(executor.clone(), key, ctx.clone());
            let handle = tokio::spawn(unit.instrument(Span::current()));
            workers.push(async move { (index, handle.await) });
        }

        let mut response = BatchResponse::with_len(total);
        let mut completed = 0usize;

        let stopped = loop {
            tokio::select! {
                biased;
                joined = workers.next() => match joined {
                    Some((index, result)) => {
                        response.store(index, flatten(result));
                        completed += 1;
                    }
                    None => break None,
                },
                reason = ctx.cancelled() => break Some(reason),
            }
        };

        if let Some(reason) = stopped {
            ctx.cancel();

            // Workers interrupted in a token wait or backoff report right away.
            let grace = tokio::time::sleep(limits.abandon_grace);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    biased;
                    joined = workers.next() => match joined {
                        Some((index, result)) => response.store(index, flatten(result)),
                        None => break,
                    },
                    () = &mut grace => break,
                }
            }

            // Dropping the join handles detaches workers still inside a
            // transport call; they finish it and start no new attempt.
            let abandoned = workers.len();
            drop(workers);

            tracing::warn!(
                %reason,
                completed,
                abandoned,
                total,
                "Batch stopped before all items finished"
            );
            response.job_error = Some(match reason {
                CancelReason::DeadlineExceeded => QueryError::JobTimeout {
                    timeout: limits.timeout,
                    completed,
                    total,
                },
                CancelReason::Cancelled => QueryError::Cancelled { reason },
            });
        }

        tracing::info!(
            successes = response.success_count(),
            failures = response.error_count(),
            "Batch finished"
        );

        response
    }
}

fn flatten<T>(joined: Result<QueryResult<T>, JoinError>) -> QueryResult<T> {
    joined.unwrap_or_else(|err| {
        tracing::error!(error = %err, "Batch worker panicked");
        Err(QueryError::request_failed(
            format!("worker failed: {}", err),
            None,
            0,
        ))
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use crate::resilience::{DefaultClassifier, RateLimiter, RetryPolicy};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn dispatcher(transport: Arc<MockTransport>) -> BatchDispatcher {
        BatchDispatcher::new(RequestExecutor::new(
            transport,
            Arc::new(DefaultClassifier::new()),
            Arc::new(RateLimiter::new(1.0, 1).unwrap()),
            RetryPolicy::default(),
        ))
    }

    fn job(keys: &[&'static str]) -> BatchJob<&'static str> {
        BatchJob::new(keys.iter().copied())
            .qps(1000.0)
            .burst(100)
            .timeout(Duration::from_secs(30))
            .retry_base_delay(Duration::from_millis(10))
    }

    fn request(key: &&'static str) -> QueryResult<QueryRequest> {
        Ok(QueryRequest::get(*key))
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch() {
        let transport = Arc::new(MockTransport::new());
        let response = dispatcher(Arc::clone(&transport))
            .dispatch(job(&[]), request)
            .await;

        assert!(response.is_empty());
        assert!(response.is_complete());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_input_order() {
        let transport = Arc::new(
            MockTransport::new()
                .with_response("a", RawResponse::ok(r#""a""#))
                .with_response("b", RawResponse::ok(r#""b""#))
                .with_response("c", RawResponse::ok(r#""c""#))
                .with_target_delay("a", Duration::from_millis(300))
                .with_target_delay("b", Duration::from_millis(10)),
        );

        let response = dispatcher(transport)
            .dispatch(job(&["a", "b", "c"]), request)
            .await;

        assert!(response.is_complete());
        let bodies: Vec<_> = (0..3)
            .map(|i| response.result(i).map(RawResponse::text))
            .collect();
        assert_eq!(
            bodies,
            vec![
                Some(r#""a""#.to_string()),
                Some(r#""b""#.to_string()),
                Some(r#""c""#.to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_failure_is_item_error() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(Arc::clone(&transport))
            .dispatch(job(&["ok", ""]), |key| {
                if key.is_empty() {
                    Err(QueryError::param_named("empty address", "key"))
                } else {
                    Ok(QueryRequest::get(*key))
                }
            })
            .await;

        assert!(response.result(0).is_some());
        assert!(matches!(response.error(1), Some(QueryError::Param { .. })));
        assert_eq!(transport.call_count(), 1);
        assert!(response.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_job_is_rejected() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(Arc::clone(&transport))
            .dispatch(job(&["a", "b"]).qps(0.0), request)
            .await;

        assert_eq!(response.len(), 2);
        assert!(matches!(response.job_error, Some(QueryError::Param { .. })));
        assert_eq!(response.error_count(), 2);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_results() {
        let transport = Arc::new(
            MockTransport::new()
                .with_default(RawResponse::ok("{}"))
                .with_target_delay("slow", Duration::from_secs(10)),
        );
        let start = Instant::now();

        let response = dispatcher(transport)
            .dispatch(
                job(&["fast", "slow"]).timeout(Duration::from_millis(100)),
                request,
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(response.result(0).is_some());
        assert!(response.result(1).is_none());
        assert!(response.error(1).is_none());
        match response.job_error {
            Some(QueryError::JobTimeout {
                completed, total, ..
            }) => {
                assert_eq!(completed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("Expected JobTimeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_token_wait() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(transport)
            .dispatch(
                job(&["a", "b"])
                    .qps(0.5)
                    .burst(1)
                    .timeout(Duration::from_millis(200)),
                request,
            )
            .await;

        assert_eq!(response.success_count(), 1);
        assert!(matches!(
            response.errors.iter().flatten().next(),
            Some(QueryError::RateLimitExceeded { .. })
        ));
        assert!(matches!(response.job_error, Some(QueryError::JobTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_runs_to_completion() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(transport)
            .dispatch(job(&["a", "b"]).timeout(Duration::MAX), request)
            .await;

        assert!(response.is_complete());
        assert_eq!(response.success_count(), 2);
        assert!(response.job_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_times_out_token_wait() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(Arc::clone(&transport))
            .dispatch(
                job(&["a", "b"])
                    .qps(1e-20)
                    .burst(1)
                    .timeout(Duration::from_millis(100)),
                request,
            )
            .await;

        assert_eq!(response.success_count(), 1);
        assert_eq!(transport.call_count(), 1);
        let failed = response.errors.iter().flatten().next();
        assert!(
            matches!(failed, Some(QueryError::RateLimitExceeded { .. })),
            "Expected RateLimitExceeded, got {:?}",
            failed
        );
        assert!(matches!(response.job_error, Some(QueryError::JobTimeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancellation() {
        let transport = Arc::new(
            MockTransport::new()
                .with_default(RawResponse::ok("{}"))
                .with_delay(Duration::from_secs(5)),
        );
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let response = dispatcher(transport)
            .dispatch(job(&["a", "b"]).with_cancellation(token.clone()), request)
            .await;

        assert!(matches!(
            response.job_error,
            Some(QueryError::Cancelled {
                reason: CancelReason::Cancelled
            })
        ));
        assert_eq!(response.success_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_context_does_not_cancel_caller_token() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let token = CancellationToken::new();

        let response = dispatcher(transport)
            .dispatch(job(&["a"]).with_cancellation(token.clone()), request)
            .await;

        assert!(response.is_complete());
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_with_custom_work() {
        let transport = Arc::new(MockTransport::new().with_default(RawResponse::ok("{}")));
        let response = dispatcher(transport)
            .dispatch_with(BatchJob::new(vec![1u32, 2, 3]), |_executor, key, _ctx| async move {
                if key == 2 {
                    Err(QueryError::param("two"))
                } else {
                    Ok(key * 10)
                }
            })
            .await;

        assert_eq!(response.result(0), Some(&10));
        assert!(response.error(1).is_some());
        assert_eq!(response.result(2), Some(&30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_panic_is_contained() {
        let transport = Arc::new(MockTransport::new());
        let response = dispatcher(transport)
            .dispatch_with(BatchJob::new(vec![1u32, 2]), |_executor, key, _ctx| async move {
                assert!(key != 2, "boom");
                Ok::<_, QueryError>(key)
            })
            .await;

        assert_eq!(response.result(0), Some(&1));
        assert!(matches!(
            response.error(1),
            Some(QueryError::RequestFailed { .. })
        ));
        assert!(response.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detail_batch() {
        let transport = Arc::new(
            MockTransport::new()
                .with_default(RawResponse::ok("{}"))
                .with_response("b/info", RawResponse::new(400, ""))
                .with_response("a/rules", RawResponse::new(404, "")),
        );

        let response = dispatcher(transport)
            .dispatch_detail(job(&["a", "b"]), |key| {
                Ok(CompositeQuery::new(QueryRequest::get(format!("{}/info", key)))
                    .with_secondary("players", QueryRequest::get(format!("{}/players", key)))
                    .with_secondary("rules", QueryRequest::get(format!("{}/rules", key))))
            })
            .await;

        let first = response.result(0).unwrap();
        assert!(first.secondary("players").is_some());
        assert!(first.partial_error("rules").is_some());
        assert!(response.error(1).is_some());
        assert!(response.is_complete());
    }
}
