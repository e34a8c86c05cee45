//! Query Client Library
//!
//! A resilient, rate-limited client for querying remote services over
//! unreliable networks, one key at a time or in ordered batches.
//!
//! # Features
//!
//! - **Rate limiting**: a shared FIFO token bucket; retries consume tokens too
//! - **Retries**: deterministic linear backoff driven by an outcome classifier
//! - **Batches**: one worker per key, a global deadline, results in input order
//! - **Partial failure**: item errors never abort sibling items
//! - **Detail queries**: a fatal primary request plus best-effort secondaries
//! - **Observability**: tracing spans, redacted URLs, a metrics collector
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use query_client::{BatchJob, JsonDecoder, QueryClient, QueryRequest};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = QueryClient::builder()
//!         .api_key("your_api_key")
//!         .rate_limit(5.0, 5)
//!         .build()?;
//!
//!     let ids = vec!["76561197960435530", "76561197960287930"];
//!     let job = client.batch_job(ids).timeout(Duration::from_secs(10));
//!     let batch = client
//!         .dispatch(job, |id| {
//!             Ok(QueryRequest::get("ISteamUser/GetPlayerSummaries/v2")
//!                 .with_param("steamids", *id))
//!         })
//!         .await;
//!
//!     let players = batch.decode(&JsonDecoder::<serde_json::Value>::at("/response/players"));
//!     for (i, result) in players.into_results().into_iter().enumerate() {
//!         match result {
//!             Ok(value) => println!("{}: {}", i, value),
//!             Err(err) => println!("{}: failed ({})", i, err),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod batch;
pub mod client;
pub mod config;
pub mod decode;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod transport;

// Re-exports for convenience
pub use batch::{BatchDispatcher, BatchJob, BatchResponse, CompositeQuery, DetailRecord};
pub use client::{QueryClient, QueryClientBuilder};
pub use config::{QueryConfig, QueryConfigBuilder};
pub use decode::{BytesDecoder, Decoder, JsonDecoder, TextDecoder};
pub use errors::{ErrorKind, QueryError, QueryResult};
pub use observability::{init_tracing, LogConfig, LogFormat, LogLevel};
pub use resilience::{
    CancelReason, Classifier, DefaultClassifier, Outcome, RateLimiter, RequestContext,
    RequestExecutor, RetryConfig, RetryPolicy,
};
pub use transport::{
    FnTransport, HttpMethod, HttpTransport, QueryRequest, RawResponse, Transport, TransportError,
};

/// Mock implementations for testing.
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
