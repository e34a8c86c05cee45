//! Error types for the query client.
//!
//! Every failure the engine can report falls into one of a small number of
//! variants. Item-level failures of a batch live next to the item they belong
//! to; job-level failures (deadline, cancellation) are reported separately.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::CancelReason;
use crate::transport::TransportError;

/// Result type alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Broad category of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration or caller-supplied input.
    Param,
    /// Transport, status, throttling or deadline failure.
    Request,
    /// Response payload could not be decoded.
    Parse,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Param => "param",
            ErrorKind::Request => "request",
            ErrorKind::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Error type for query client operations.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Configuration error (invalid base URL, rate, timeout, etc.)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Invalid caller input. Never retried.
    #[error("Invalid parameter: {message}")]
    Param {
        /// Error message.
        message: String,
        /// The parameter that caused the error.
        param: Option<String>,
    },

    /// Token acquisition was cancelled before a token became available.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        /// Error message.
        message: String,
        /// Attempt during which the wait was cancelled.
        attempt: u32,
    },

    /// Terminal transport or status failure, or retries exhausted.
    #[error("Request failed after {attempts} attempt(s): {message}")]
    RequestFailed {
        /// Error message.
        message: String,
        /// Last HTTP status code observed, if any.
        status_code: Option<u16>,
        /// Number of transport attempts made.
        attempts: u32,
    },

    /// The payload was received but is structurally invalid.
    #[error("Failed to decode response: {message}")]
    ResponseDecodeFailed {
        /// Error message.
        message: String,
        /// HTTP status code of the response.
        status_code: Option<u16>,
    },

    /// The batch deadline expired before every item completed.
    #[error("Batch job timed out after {timeout:?} ({completed}/{total} items completed)")]
    JobTimeout {
        /// The job timeout.
        timeout: Duration,
        /// Items that reported a result or error before expiry.
        completed: usize,
        /// Total items in the job.
        total: usize,
    },

    /// The request or job was cancelled before it could finish.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why the work was cancelled.
        reason: CancelReason,
    },
}

impl QueryError {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Configuration { .. } | QueryError::Param { .. } => ErrorKind::Param,
            QueryError::ResponseDecodeFailed { .. } => ErrorKind::Parse,
            QueryError::RateLimitExceeded { .. }
            | QueryError::RequestFailed { .. }
            | QueryError::JobTimeout { .. }
            | QueryError::Cancelled { .. } => ErrorKind::Request,
        }
    }

    /// Returns a stable numeric code for this error.
    ///
    /// Codes are grouped by kind: `1xxxx` param, `2xxxx` parse, `3xxxx` request.
    pub fn code(&self) -> u32 {
        match self {
            QueryError::Configuration { .. } => 10001,
            QueryError::Param { .. } => 10002,
            QueryError::ResponseDecodeFailed { .. } => 20001,
            QueryError::RateLimitExceeded { .. } => 30001,
            QueryError::RequestFailed { .. } => 30002,
            QueryError::JobTimeout { .. } => 30003,
            QueryError::Cancelled { .. } => 30004,
        }
    }

    /// Returns the HTTP status code attached to this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            QueryError::RequestFailed { status_code, .. }
            | QueryError::ResponseDecodeFailed { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Returns true for job-level deadline or cancellation errors.
    pub fn is_job_level(&self) -> bool {
        matches!(
            self,
            QueryError::JobTimeout { .. } | QueryError::Cancelled { .. }
        )
    }

    /// Returns true if retrying the same request could succeed.
    ///
    /// Item errors reaching the caller have already exhausted the retry
    /// budget; this reports whether the underlying cause was transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::RequestFailed { status_code, .. } => match status_code {
                None => true,
                Some(status) => *status == 429 || (500..600).contains(status),
            },
            QueryError::RateLimitExceeded { .. } => true,
            _ => false,
        }
    }

    /// Records the number of attempts on a request failure.
    pub(crate) fn with_attempts(mut self, count: u32) -> Self {
        if let QueryError::RequestFailed { attempts, .. } = &mut self {
            *attempts = count;
        }
        self
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        QueryError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a parameter error.
    pub fn param(message: impl Into<String>) -> Self {
        QueryError::Param {
            message: message.into(),
            param: None,
        }
    }

    /// Creates a parameter error naming the offending parameter.
    pub fn param_named(message: impl Into<String>, param: impl Into<String>) -> Self {
        QueryError::Param {
            message: message.into(),
            param: Some(param.into()),
        }
    }

    /// Creates a request failure.
    pub fn request_failed(
        message: impl Into<String>,
        status_code: Option<u16>,
        attempts: u32,
    ) -> Self {
        QueryError::RequestFailed {
            message: message.into(),
            status_code,
            attempts,
        }
    }

    /// Creates a decode failure.
    pub fn decode(message: impl Into<String>, status_code: Option<u16>) -> Self {
        QueryError::ResponseDecodeFailed {
            message: message.into(),
            status_code,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::ResponseDecodeFailed {
            message: err.to_string(),
            status_code: None,
        }
    }
}

impl From<url::ParseError> for QueryError {
    fn from(err: url::ParseError) -> Self {
        QueryError::Param {
            message: format!("Invalid URL: {}", err),
            param: Some("target".to_string()),
        }
    }
}

impl From<TransportError> for QueryError {
    fn from(err: TransportError) -> Self {
        QueryError::RequestFailed {
            message: err.to_string(),
            status_code: None,
            attempts: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(QueryError::param("empty key").kind(), ErrorKind::Param);
        assert_eq!(QueryError::configuration("bad").kind(), ErrorKind::Param);
        assert_eq!(QueryError::decode("bad json", Some(200)).kind(), ErrorKind::Parse);
        assert_eq!(
            QueryError::request_failed("boom", Some(500), 3).kind(),
            ErrorKind::Request
        );
        assert_eq!(
            QueryError::Cancelled {
                reason: CancelReason::DeadlineExceeded
            }
            .kind(),
            ErrorKind::Request
        );
    }

    #[test]
    fn test_error_codes_are_grouped_by_kind() {
        assert_eq!(QueryError::param("x").code() / 10000, 1);
        assert_eq!(QueryError::decode("x", None).code() / 10000, 2);
        assert_eq!(
            QueryError::RateLimitExceeded {
                message: "x".to_string(),
                attempt: 1
            }
            .code()
                / 10000,
            3
        );
    }

    #[test]
    fn test_job_level_errors() {
        let timeout = QueryError::JobTimeout {
            timeout: Duration::from_millis(100),
            completed: 1,
            total: 4,
        };
        assert!(timeout.is_job_level());
        assert!(timeout.to_string().contains("1/4"));
        assert!(!QueryError::request_failed("x", None, 1).is_job_level());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(QueryError::request_failed("x", Some(503), 3).is_retryable());
        assert!(QueryError::request_failed("x", Some(429), 3).is_retryable());
        assert!(QueryError::request_failed("refused", None, 3).is_retryable());
        assert!(!QueryError::request_failed("x", Some(401), 1).is_retryable());
        assert!(!QueryError::decode("x", Some(200)).is_retryable());
    }

    #[test]
    fn test_with_attempts() {
        let err = QueryError::request_failed("x", Some(404), 1).with_attempts(2);
        assert!(matches!(err, QueryError::RequestFailed { attempts: 2, .. }));

        let err = QueryError::param("x").with_attempts(2);
        assert!(matches!(err, QueryError::Param { .. }));
    }

    #[test]
    fn test_status_code_accessor() {
        assert_eq!(
            QueryError::request_failed("x", Some(404), 1).status_code(),
            Some(404)
        );
        assert_eq!(QueryError::param("x").status_code(), None);
    }

    #[test]
    fn test_from_transport_error() {
        let err: QueryError = TransportError::Connection {
            message: "refused".to_string(),
        }
        .into();

        match err {
            QueryError::RequestFailed {
                message, attempts, ..
            } => {
                assert!(message.contains("refused"));
                assert_eq!(attempts, 1);
            }
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }
}
