//! HTTP transport implementation.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use super::{
    HttpMethod, ProxyRotator, ProxyStrategy, QueryRequest, RawResponse, Transport, TransportError,
};
use crate::config::QueryConfig;
use crate::observability::redact;

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("query-client/", env!("CARGO_PKG_VERSION"));

/// HTTP transport implementation using reqwest.
///
/// Relative targets are joined onto the base URL. Configured query secrets
/// (API key, access token) are appended to every request that does not
/// already carry a parameter of the same name.
pub struct HttpTransport {
    clients: Vec<Client>,
    rotator: Option<ProxyRotator>,
    base_url: String,
    timeout: Duration,
    user_agent: String,
    default_headers: Vec<(String, String)>,
    query_secrets: Vec<(String, SecretString)>,
}

impl HttpTransport {
    /// Creates a new HTTP transport without proxies.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = build_client(timeout, None)?;

        Ok(Self {
            clients: vec![client],
            rotator: None,
            base_url: base_url.into(),
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_headers: Vec::new(),
            query_secrets: Vec::new(),
        })
    }

    /// Creates a transport from a validated client configuration.
    pub fn from_config(config: &QueryConfig) -> Result<Self, TransportError> {
        let mut transport = Self::new(config.base_url.clone(), config.timeout)?
            .with_user_agent(config.user_agent.clone());

        for (name, value) in &config.custom_headers {
            transport = transport.with_default_header(name.clone(), value.clone());
        }
        if let Some(key) = &config.api_key {
            transport = transport.with_query_secret("key", key.clone());
        }
        if let Some(token) = &config.access_token {
            transport = transport.with_query_secret("access_token", token.clone());
        }
        if !config.proxy_pool.is_empty() {
            transport = transport.with_proxies(
                &config.proxy_pool,
                config.proxy_strategy,
                config.proxy_credentials(),
            )?;
        }

        Ok(transport)
    }

    /// Sets the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a header sent with every request.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Adds a secret query parameter appended to every request.
    pub fn with_query_secret(mut self, name: impl Into<String>, value: SecretString) -> Self {
        self.query_secrets.push((name.into(), value));
        self
    }

    /// Routes requests through a pool of proxies.
    ///
    /// One client is built per proxy so connection pools stay per-route.
    pub fn with_proxies(
        mut self,
        pool: &[String],
        strategy: ProxyStrategy,
        credentials: Option<(&str, &str)>,
    ) -> Result<Self, TransportError> {
        let mut clients = Vec::with_capacity(pool.len());
        for address in pool {
            let mut proxy =
                reqwest::Proxy::all(address.as_str()).map_err(|e| TransportError::InvalidRequest {
                    message: format!("invalid proxy '{}': {}", address, e),
                })?;
            if let Some((user, pass)) = credentials {
                proxy = proxy.basic_auth(user, pass);
            }
            clients.push(build_client(self.timeout, Some(proxy))?);
        }

        if !clients.is_empty() {
            self.rotator = Some(ProxyRotator::new(clients.len(), strategy));
            self.clients = clients;
        }
        Ok(self)
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn client(&self) -> &Client {
        let index = self
            .rotator
            .as_ref()
            .and_then(ProxyRotator::next_index)
            .unwrap_or(0);
        &self.clients[index % self.clients.len()]
    }

    /// Builds the full URL for a request, including query parameters.
    pub(crate) fn build_url(&self, request: &QueryRequest) -> Result<Url, TransportError> {
        let absolute =
            request.target.starts_with("http://") || request.target.starts_with("https://");
        let raw = if absolute {
            request.target.clone()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                request.target.trim_start_matches('/')
            )
        };

        let mut url = Url::parse(&raw).map_err(|e| TransportError::InvalidRequest {
            message: format!("invalid target '{}': {}", request.target, e),
        })?;

        let secrets: Vec<_> = self
            .query_secrets
            .iter()
            .filter(|(name, _)| request.param(name).is_none())
            .collect();

        if !request.params.is_empty() || !secrets.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.params {
                pairs.append_pair(name, value);
            }
            for (name, secret) in secrets {
                pairs.append_pair(name, secret.expose_secret());
            }
        }

        Ok(url)
    }

    fn build_headers(&self, request: &QueryRequest) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), self.user_agent.clone());
        for (name, value) in &self.default_headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
        for (name, value) in &request.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }
        headers
    }
}

fn build_client(
    timeout: Duration,
    proxy: Option<reqwest::Proxy>,
) -> Result<Client, TransportError> {
    let mut builder = ClientBuilder::new()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Duration::from_secs(60));

    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| TransportError::Connection {
        message: e.to_string(),
    })
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, target = %request.target))]
    async fn send(&self, request: QueryRequest) -> Result<RawResponse, TransportError> {
        let url = self.build_url(&request)?;
        let timeout = request.timeout.unwrap_or(self.timeout);
        tracing::trace!(url = %redact(url.as_str()), "Sending request");

        let client = self.client();
        let mut req_builder = match request.method {
            HttpMethod::Get => client.get(url),
            HttpMethod::Post => client.post(url),
        };

        for (name, value) in self.build_headers(&request) {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        if request.timeout.is_some() {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { timeout }
            } else if e.is_connect() {
                TransportError::Connection {
                    message: e.to_string(),
                }
            } else {
                TransportError::InvalidResponse {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { timeout }
            } else {
                TransportError::InvalidResponse {
                    message: e.to_string(),
                }
            }
        })?;

        tracing::debug!(status, bytes = body.len(), "Received response");

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("proxies", &self.rotator.as_ref().map_or(0, ProxyRotator::len))
            .field(
                "query_secrets",
                &self.query_secrets.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
