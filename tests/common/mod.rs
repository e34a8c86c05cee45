//! Shared helpers for integration tests.

#![allow(dead_code)]

use query_client::mocks::MockTransport;
use query_client::{QueryClient, RawResponse};
use std::sync::Arc;
use std::time::Duration;

/// Queues a success whose body names `target`.
pub fn echo(transport: MockTransport, target: &str) -> MockTransport {
    transport.with_response(target, RawResponse::ok(format!(r#"{{"target":"{}"}}"#, target)))
}

/// Builds a client over `transport` with fast retries.
pub fn client(transport: Arc<MockTransport>) -> QueryClient {
    QueryClient::builder()
        .retry_base_delay(Duration::from_millis(10))
        .transport(transport)
        .build()
        .unwrap()
}

/// Extracts the target named by an [`echo`] body.
pub fn echoed_target(response: &RawResponse) -> String {
    response.json::<serde_json::Value>().unwrap()["target"]
        .as_str()
        .unwrap()
        .to_string()
}
