//! Query client.
//!
//! Provides the main entry point: single rate-limited requests and ordered
//! batch dispatch over one shared engine.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchDispatcher, BatchJob, BatchResponse, CompositeQuery, DetailRecord};
use crate::config::{QueryConfig, QueryConfigBuilder};
use crate::decode::{Decoder, JsonDecoder};
use crate::errors::{QueryError, QueryResult};
use crate::observability::{DefaultMetricsCollector, MetricsCollector, RequestMetrics};
use crate::resilience::{
    Classifier, DefaultClassifier, RateLimiter, RequestContext, RequestExecutor, RetryPolicy,
};
use crate::transport::{HttpTransport, QueryRequest, RawResponse, Transport};

/// The main query client.
///
/// # Example
///
/// ```rust,no_run
/// use query_client::{BatchJob, QueryClient, QueryRequest};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = QueryClient::builder()
///         .api_key("your_api_key")
///         .build()?;
///
///     let summary = client
///         .execute_single(
///             QueryRequest::get("ISteamUser/GetPlayerSummaries/v2")
///                 .with_param("steamids", "76561197960435530"),
///         )
///         .await?;
///     println!("{}", summary.text());
///
///     let job = BatchJob::new(vec!["1.2.3.4:27015", "5.6.7.8:27015"])
///         .qps(2.0)
///         .burst(1)
///         .timeout(Duration::from_secs(10));
///     let batch = client
///         .dispatch(job, |addr| {
///             Ok(QueryRequest::get("IGameServersService/GetServerList/v1")
///                 .with_param("filter", format!("\\addr\\{}", addr)))
///         })
///         .await;
///     println!("{} of {} succeeded", batch.success_count(), batch.len());
///     Ok(())
/// }
/// ```
pub struct QueryClient {
    config: QueryConfig,
    executor: RequestExecutor,
    dispatcher: BatchDispatcher,
    metrics: Arc<dyn MetricsCollector>,
}

impl QueryClient {
    /// Creates a new client builder.
    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::new()
    }

    /// Creates a client from environment variables.
    ///
    /// See [`QueryConfig::from_env`] for the variables read.
    pub fn from_env() -> QueryResult<Self> {
        let config = QueryConfig::from_env()?;
        QueryClientBuilder::from_config(config).build()
    }

    /// Runs one request through the engine limiter and retry loop.
    ///
    /// The whole call, retries included, is bounded by the request timeout
    /// or, if unset, the configured timeout.
    pub async fn execute_single(&self, request: QueryRequest) -> QueryResult<RawResponse> {
        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let ctx = RequestContext::with_timeout(timeout);
        self.execute_with_context(&request, &ctx).await
    }

    /// Runs one request under a caller supplied context.
    ///
    /// Returns as soon as the context is done, even if a transport call is
    /// still in progress.
    pub async fn execute_with_context(
        &self,
        request: &QueryRequest,
        ctx: &RequestContext,
    ) -> QueryResult<RawResponse> {
        // The executor reports its own deadline errors; it wins a tie.
        tokio::select! {
            biased;
            outcome = self.executor.execute(request, ctx) => outcome.into_result(),
            reason = ctx.cancelled() => {
                tracing::warn!(target = %request.target, %reason, "Request abandoned");
                Err(QueryError::Cancelled { reason })
            }
        }
    }

    /// Runs one request and decodes its JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, request: QueryRequest) -> QueryResult<T> {
        let response = self.execute_single(request).await?;
        JsonDecoder::<T>::new().decode(&response)
    }

    /// Runs one request and decodes it with `decoder`.
    pub async fn get_with<D: Decoder>(
        &self,
        request: QueryRequest,
        decoder: &D,
    ) -> QueryResult<D::Output> {
        let response = self.execute_single(request).await?;
        decoder.decode(&response)
    }

    /// Runs a batch job, one request per key.
    pub async fn dispatch<K, F>(&self, job: BatchJob<K>, build: F) -> BatchResponse
    where
        F: Fn(&K) -> QueryResult<QueryRequest>,
    {
        self.dispatcher.dispatch(job, build).await
    }

    /// Runs a batch with explicit limits.
    pub async fn dispatch_batch<K, F>(
        &self,
        keys: impl IntoIterator<Item = K>,
        qps: f64,
        burst: u32,
        timeout: Duration,
        max_attempts: u32,
        build: F,
    ) -> BatchResponse
    where
        F: Fn(&K) -> QueryResult<QueryRequest>,
    {
        let job = BatchJob::new(keys)
            .qps(qps)
            .burst(burst)
            .timeout(timeout)
            .max_attempts(max_attempts);
        self.dispatcher.dispatch(job, build).await
    }

    /// Runs a composite detail query per key.
    pub async fn dispatch_detail<K, F>(
        &self,
        job: BatchJob<K>,
        build: F,
    ) -> BatchResponse<DetailRecord>
    where
        F: Fn(&K) -> QueryResult<CompositeQuery>,
    {
        self.dispatcher.dispatch_detail(job, build).await
    }

    /// Returns a job over `keys` seeded with the configured limits.
    pub fn batch_job<K>(&self, keys: impl IntoIterator<Item = K>) -> BatchJob<K> {
        BatchJob::new(keys)
            .rate_limit(self.config.rate_limit)
            .max_attempts(self.config.max_attempts)
    }

    /// Returns a metrics snapshot.
    pub fn metrics(&self) -> RequestMetrics {
        self.metrics.get_metrics()
    }

    /// Returns the metrics collector.
    pub fn metrics_collector(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    /// Returns the engine executor.
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Returns the batch dispatcher.
    pub fn dispatcher(&self) -> &BatchDispatcher {
        &self.dispatcher
    }

    /// Returns the configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

/// Builder for the query client.
pub struct QueryClientBuilder {
    config_builder: Option<QueryConfigBuilder>,
    config: Option<QueryConfig>,
    transport: Option<Arc<dyn Transport>>,
    classifier: Option<Arc<dyn Classifier>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl QueryClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: Some(QueryConfigBuilder::new()),
            config: None,
            transport: None,
            classifier: None,
            metrics: None,
        }
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(config: QueryConfig) -> Self {
        Self {
            config_builder: None,
            config: Some(config),
            transport: None,
            classifier: None,
            metrics: None,
        }
    }

    fn with_config(mut self, f: impl FnOnce(QueryConfigBuilder) -> QueryConfigBuilder) -> Self {
        if let Some(builder) = self.config_builder.take() {
            self.config_builder = Some(f(builder));
        }
        self
    }

    /// Sets the API key.
    pub fn api_key(self, api_key: impl Into<String>) -> Self {
        self.with_config(|b| b.api_key(api_key))
    }

    /// Sets the access token.
    pub fn access_token(self, token: impl Into<String>) -> Self {
        self.with_config(|b| b.access_token(token))
    }

    /// Sets the base URL.
    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        self.with_config(|b| b.base_url(base_url))
    }

    /// Sets the per-request timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.with_config(|b| b.timeout(timeout))
    }

    /// Sets the attempt budget per request.
    pub fn max_attempts(self, attempts: u32) -> Self {
        self.with_config(|b| b.max_attempts(attempts))
    }

    /// Sets the linear backoff unit.
    pub fn retry_base_delay(self, delay: Duration) -> Self {
        self.with_config(|b| b.retry_base_delay(delay))
    }

    /// Sets the engine rate limit.
    pub fn rate_limit(self, qps: f64, burst: u32) -> Self {
        self.with_config(|b| b.rate_limit_qps(qps).rate_limit_burst(burst))
    }

    /// Caps simultaneous transport calls.
    pub fn max_in_flight(self, max: usize) -> Self {
        self.with_config(|b| b.max_in_flight(max))
    }

    /// Adds a custom header.
    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_config(|b| b.header(name, value))
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom outcome classifier.
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client.
    pub fn build(self) -> QueryResult<QueryClient> {
        let config = match (self.config, self.config_builder) {
            (Some(config), _) => config,
            (None, Some(builder)) => builder.build()?,
            (None, None) => QueryConfigBuilder::new().build()?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                HttpTransport::from_config(&config)
                    .map_err(|e| QueryError::configuration(e.to_string()))?,
            ),
        };

        let classifier: Arc<dyn Classifier> = self
            .classifier
            .unwrap_or_else(|| Arc::new(DefaultClassifier::new()));

        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new()));

        let limiter = RateLimiter::from_config(config.rate_limit)
            .map_err(|e| QueryError::configuration(e.to_string()))?;

        let mut executor = RequestExecutor::new(
            transport,
            classifier,
            Arc::new(limiter),
            RetryPolicy::new(config.retry_config()),
        )
        .with_metrics(Arc::clone(&metrics));
        if let Some(max) = config.max_in_flight {
            executor = executor.with_max_in_flight(max);
        }

        tracing::debug!(
            base_url = %config.base_url,
            qps = config.rate_limit.qps,
            burst = config.rate_limit.burst,
            "Query client created"
        );

        Ok(QueryClient {
            dispatcher: BatchDispatcher::new(executor.clone()),
            executor,
            config,
            metrics,
        })
    }
}

impl Default for QueryClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
