//! Outcome classification for transport results.
//!
//! This is the only place status-code policy lives. Together with the retry
//! policy it fully determines whether a request is tried again.

use serde::de::IgnoredAny;

use crate::errors::{QueryError, QueryResult};
use crate::transport::{RawResponse, TransportError};

/// Result of one transport attempt.
#[derive(Debug, Clone)]
pub enum Outcome<T = RawResponse> {
    /// The attempt produced a usable payload.
    Success(T),
    /// The attempt failed in a way that may succeed on retry.
    Retryable {
        /// Human readable cause.
        reason: String,
        /// Status code, when the failure came with one.
        status: Option<u16>,
    },
    /// The attempt failed and retrying will not help.
    Terminal(QueryError),
}

/// Variant tag of an [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// [`Outcome::Success`].
    Success,
    /// [`Outcome::Retryable`].
    Retryable,
    /// [`Outcome::Terminal`].
    Terminal,
}

impl<T> Outcome<T> {
    /// Creates a retryable outcome.
    pub fn retryable(reason: impl Into<String>, status: Option<u16>) -> Self {
        Outcome::Retryable {
            reason: reason.into(),
            status,
        }
    }

    /// Returns the variant tag.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Retryable { .. } => OutcomeKind::Retryable,
            Outcome::Terminal(_) => OutcomeKind::Terminal,
        }
    }

    /// Returns true for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Status code carried by a failed outcome.
    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Retryable { status, .. } => *status,
            Outcome::Terminal(err) => err.status_code(),
        }
    }

    /// Converts the outcome into a result.
    ///
    /// A retryable outcome that reaches the caller is reported as a failed
    /// request after a single attempt.
    pub fn into_result(self) -> QueryResult<T> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Retryable { reason, status } => {
                Err(QueryError::request_failed(reason, status, 1))
            }
            Outcome::Terminal(err) => Err(err),
        }
    }
}

/// Decides whether a transport result is a success, retryable or terminal.
///
/// Implementations must be pure: the same input always yields the same
/// variant. Any `Fn(Result<RawResponse, TransportError>) -> Outcome` closure
/// is a classifier.
pub trait Classifier: Send + Sync {
    /// Classifies one transport result.
    fn classify(&self, result: Result<RawResponse, TransportError>) -> Outcome;
}

impl<F> Classifier for F
where
    F: Fn(Result<RawResponse, TransportError>) -> Outcome + Send + Sync,
{
    fn classify(&self, result: Result<RawResponse, TransportError>) -> Outcome {
        self(result)
    }
}

/// Status-code classifier used by default.
///
/// - transport error: retryable
/// - `429` and `5xx`: retryable
/// - `200` with a valid payload: success
/// - anything else: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultClassifier {
    require_json: bool,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultClassifier {
    /// Creates a classifier that requires `200` bodies to be valid JSON.
    pub fn new() -> Self {
        Self { require_json: true }
    }

    /// Creates a classifier that accepts any `200` body.
    pub fn raw() -> Self {
        Self {
            require_json: false,
        }
    }

    /// Returns true if `200` bodies must be valid JSON.
    pub fn requires_json(&self) -> bool {
        self.require_json
    }

    fn terminal_status(status: u16) -> QueryError {
        let message = match status {
            400 => "invalid request params".to_string(),
            401 => "invalid api key".to_string(),
            403 => "access forbidden".to_string(),
            404 => "resource not found".to_string(),
            other => format!("unexpected status code {}", other),
        };
        QueryError::request_failed(message, Some(status), 1)
    }
}

impl Classifier for DefaultClassifier {
    fn classify(&self, result: Result<RawResponse, TransportError>) -> Outcome {
        let response = match result {
            Ok(response) => response,
            Err(err) => return Outcome::retryable(err.to_string(), None),
        };

        match response.status {
            200 => {
                if self.require_json {
                    let parsed = serde_json::from_slice::<IgnoredAny>(&response.body);
                    if let Err(err) = parsed {
                        return Outcome::Terminal(QueryError::decode(
                            format!("invalid response payload: {}", err),
                            Some(200),
                        ));
                    }
                }
                Outcome::Success(response)
            }
            429 => Outcome::retryable("api quota exceeded", Some(429)),
            status @ 500..=599 => {
                Outcome::retryable(format!("server error (status {})", status), Some(status))
            }
            status => Outcome::Terminal(Self::terminal_status(status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use test_case::test_case;

    fn response(status: u16, body: &'static str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::new(status, body))
    }

    fn refused() -> TransportError {
        TransportError::Connection {
            message: "refused".into(),
        }
    }

    fn timed_out() -> TransportError {
        TransportError::Timeout {
            timeout: Duration::from_secs(5),
        }
    }

    fn truncated() -> TransportError {
        TransportError::InvalidResponse {
            message: "truncated".into(),
        }
    }

    #[test_case(response(200, r#"{"response":{}}"#), OutcomeKind::Success ; "ok json")]
    #[test_case(response(200, "not json"), OutcomeKind::Terminal ; "ok bad payload")]
    #[test_case(response(429, ""), OutcomeKind::Retryable ; "throttled")]
    #[test_case(response(500, ""), OutcomeKind::Retryable ; "internal error")]
    #[test_case(response(503, ""), OutcomeKind::Retryable ; "unavailable")]
    #[test_case(response(599, ""), OutcomeKind::Retryable ; "upper 5xx")]
    #[test_case(response(400, ""), OutcomeKind::Terminal ; "bad request")]
    #[test_case(response(401, ""), OutcomeKind::Terminal ; "unauthorized")]
    #[test_case(response(404, ""), OutcomeKind::Terminal ; "not found")]
    #[test_case(response(204, ""), OutcomeKind::Terminal ; "no content")]
    #[test_case(Err(refused()), OutcomeKind::Retryable ; "connection refused")]
    #[test_case(Err(timed_out()), OutcomeKind::Retryable ; "timeout")]
    #[test_case(Err(truncated()), OutcomeKind::Retryable ; "malformed")]
    fn test_default_classification(
        input: Result<RawResponse, TransportError>,
        expected: OutcomeKind,
    ) {
        assert_eq!(DefaultClassifier::new().classify(input).kind(), expected);
    }

    #[test]
    fn test_raw_classifier_accepts_any_body() {
        let body = RawResponse::ok(&b"\xff\x00binary"[..]);
        let outcome = DefaultClassifier::raw().classify(Ok(body));
        assert!(outcome.is_success());
    }

    #[test]
    fn test_terminal_messages() {
        let outcome = DefaultClassifier::new().classify(response(401, ""));
        match outcome {
            Outcome::Terminal(QueryError::RequestFailed {
                message,
                status_code,
                ..
            }) => {
                assert_eq!(message, "invalid api key");
                assert_eq!(status_code, Some(401));
            }
            other => panic!("Expected terminal RequestFailed, got {:?}", other),
        }

        let outcome = DefaultClassifier::new().classify(response(200, "{"));
        assert!(matches!(
            outcome,
            Outcome::Terminal(QueryError::ResponseDecodeFailed { .. })
        ));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let classifier = DefaultClassifier::new();
        let inputs = vec![
            response(200, "{}"),
            response(200, "oops"),
            response(429, ""),
            response(502, ""),
            response(418, ""),
            Err(TransportError::Connection {
                message: "reset".into(),
            }),
        ];

        for input in inputs {
            let first = classifier.classify(input.clone()).kind();
            let second = classifier.classify(input).kind();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |result: Result<RawResponse, TransportError>| match result {
            Ok(response) if response.status == 404 => Outcome::retryable("not yet", Some(404)),
            other => DefaultClassifier::raw().classify(other),
        };

        assert_eq!(
            classifier.classify(response(404, "")).kind(),
            OutcomeKind::Retryable
        );
    }

    #[test]
    fn test_into_result() {
        let ok: Outcome<u32> = Outcome::Success(7);
        assert_eq!(ok.into_result().unwrap(), 7);

        let retryable: Outcome<u32> = Outcome::retryable("busy", Some(503));
        let err = retryable.into_result().unwrap_err();
        assert_eq!(err.status_code(), Some(503));
    }
}
