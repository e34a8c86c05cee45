//! Composite "detail" queries: one fatal primary request plus best-effort
//! secondary requests, run sequentially for a single key.

use crate::decode::Decoder;
use crate::errors::{QueryError, QueryResult};
use crate::resilience::{RequestContext, RequestExecutor};
use crate::transport::{QueryRequest, RawResponse};

/// The sub-queries issued for one key.
#[derive(Debug, Clone)]
pub struct CompositeQuery {
    /// Request whose failure fails the whole item.
    pub primary: QueryRequest,
    /// Named requests whose failures are recorded but not fatal.
    pub secondary: Vec<(String, QueryRequest)>,
}

impl CompositeQuery {
    /// Creates a composite query with only a primary request.
    pub fn new(primary: QueryRequest) -> Self {
        Self {
            primary,
            secondary: Vec::new(),
        }
    }

    /// Adds a named best-effort request.
    pub fn with_secondary(mut self, name: impl Into<String>, request: QueryRequest) -> Self {
        self.secondary.push((name.into(), request));
        self
    }
}

/// Merged result of a [`CompositeQuery`].
#[derive(Debug, Clone)]
pub struct DetailRecord {
    /// Primary response.
    pub primary: RawResponse,
    /// Secondary responses that succeeded, in query order.
    pub secondary: Vec<(String, RawResponse)>,
    /// Secondary failures, in query order.
    pub partial_errors: Vec<(String, QueryError)>,
}

impl DetailRecord {
    /// Returns a secondary response by name.
    pub fn secondary(&self, name: &str) -> Option<&RawResponse> {
        self.secondary
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, response)| response)
    }

    /// Returns the failure of a secondary request by name.
    pub fn partial_error(&self, name: &str) -> Option<&QueryError> {
        self.partial_errors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, err)| err)
    }

    /// Returns true if every secondary request succeeded.
    pub fn is_complete(&self) -> bool {
        self.partial_errors.is_empty()
    }

    /// Decodes the primary response.
    pub fn decode_primary<D: Decoder>(&self, decoder: &D) -> QueryResult<D::Output> {
        decoder.decode(&self.primary)
    }

    /// Decodes a secondary response. `Ok(None)` if it is missing.
    pub fn decode_secondary<D: Decoder>(
        &self,
        name: &str,
        decoder: &D,
    ) -> QueryResult<Option<D::Output>> {
        self.secondary(name).map(|r| decoder.decode(r)).transpose()
    }
}

/// Runs a composite query for one key.
///
/// The primary request runs first; if it fails the item fails and no
/// secondary request is issued.
pub(crate) async fn run_composite(
    executor: &RequestExecutor,
    query: CompositeQuery,
    ctx: &RequestContext,
) -> QueryResult<DetailRecord> {
    let primary = executor.execute(&query.primary, ctx).await.into_result()?;

    let mut record = DetailRecord {
        primary,
        secondary: Vec::with_capacity(query.secondary.len()),
        partial_errors: Vec::new(),
    };

    for (name, request) in query.secondary {
        match executor.execute(&request, ctx).await.into_result() {
            Ok(response) => record.secondary.push((name, response)),
            Err(err) => {
                tracing::debug!(part = %name, error = %err, "Secondary query failed");
                record.partial_errors.push((name, err));
            }
        }
    }

    Ok(record)
}
