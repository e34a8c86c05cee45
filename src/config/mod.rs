//! Configuration module for the query client.
//!
//! Provides credentials, the base URL, the per-request timeout, retry and
//! rate limit settings, and the optional outbound proxy pool.

use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::errors::{QueryError, QueryResult};
use crate::resilience::{RateLimitConfig, RetryConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::transport::{ProxyStrategy, DEFAULT_USER_AGENT};

/// Default base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.steampowered.com";

/// Default per-request timeout (5 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the query client.
#[derive(Clone)]
pub struct QueryConfig {
    /// API key sent as the `key` query parameter.
    pub api_key: Option<SecretString>,
    /// Access token sent as the `access_token` query parameter.
    pub access_token: Option<SecretString>,
    /// Base URL that relative targets are joined to.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Linear backoff unit.
    pub retry_base_delay: Duration,
    /// Engine-wide rate limit.
    pub rate_limit: RateLimitConfig,
    /// Cap on simultaneous transport calls. `None` means unbounded.
    pub max_in_flight: Option<usize>,
    /// Outbound proxy URLs.
    pub proxy_pool: Vec<String>,
    /// How proxies are picked from the pool.
    pub proxy_strategy: ProxyStrategy,
    /// Proxy user name.
    pub proxy_username: Option<String>,
    /// Proxy password.
    pub proxy_password: Option<SecretString>,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Headers sent with every request.
    pub custom_headers: Vec<(String, String)>,
}

impl QueryConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> QueryConfigBuilder {
        QueryConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QUERY_API_KEY`, `QUERY_ACCESS_TOKEN`: credentials
    /// - `QUERY_BASE_URL`: custom base URL
    /// - `QUERY_TIMEOUT`: request timeout in seconds (fractions allowed)
    /// - `QUERY_MAX_ATTEMPTS`, `QUERY_RETRY_BASE_DELAY_MS`: retry budget
    /// - `QUERY_RATE_LIMIT_QPS`, `QUERY_RATE_LIMIT_BURST`: rate limit
    /// - `QUERY_MAX_IN_FLIGHT`: concurrency cap
    /// - `QUERY_PROXY_POOL` (comma separated), `QUERY_PROXY_STRATEGY`,
    ///   `QUERY_PROXY_USER`, `QUERY_PROXY_PASS`: proxies
    /// - `QUERY_USER_AGENT`: user agent
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> QueryResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueryResult<Self> {
        let parsed = |name: &str| -> Option<String> {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut builder = QueryConfigBuilder::new();

        if let Some(key) = parsed("QUERY_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(token) = parsed("QUERY_ACCESS_TOKEN") {
            builder = builder.access_token(token);
        }
        if let Some(base_url) = parsed("QUERY_BASE_URL") {
            builder = builder.base_url(base_url);
        }
        if let Some(secs) = parsed("QUERY_TIMEOUT").and_then(|v| v.parse::<f64>().ok()) {
            if let Ok(timeout) = Duration::try_from_secs_f64(secs) {
                builder = builder.timeout(timeout);
            }
        }
        if let Some(attempts) = parse_env(parsed("QUERY_MAX_ATTEMPTS")) {
            builder = builder.max_attempts(attempts);
        }
        if let Some(ms) = parse_env(parsed("QUERY_RETRY_BASE_DELAY_MS")) {
            builder = builder.retry_base_delay(Duration::from_millis(ms));
        }
        if let Some(qps) = parse_env(parsed("QUERY_RATE_LIMIT_QPS")) {
            builder = builder.rate_limit_qps(qps);
        }
        if let Some(burst) = parse_env(parsed("QUERY_RATE_LIMIT_BURST")) {
            builder = builder.rate_limit_burst(burst);
        }
        if let Some(max) = parse_env(parsed("QUERY_MAX_IN_FLIGHT")) {
            builder = builder.max_in_flight(max);
        }
        if let Some(pool) = parsed("QUERY_PROXY_POOL") {
            builder = builder.proxies(
                pool.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from),
            );
        }
        if let Some(strategy) = parse_env::<ProxyStrategy>(parsed("QUERY_PROXY_STRATEGY")) {
            builder = builder.proxy_strategy(strategy);
        }
        if let Some(user) = parsed("QUERY_PROXY_USER") {
            builder = builder.proxy_auth(user, parsed("QUERY_PROXY_PASS").unwrap_or_default());
        }
        if let Some(user_agent) = parsed("QUERY_USER_AGENT") {
            builder = builder.user_agent(user_agent);
        }

        builder.build()
    }

    /// Returns the retry configuration.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.max_attempts)
            .base_delay(self.retry_base_delay)
    }

    /// Returns the proxy credentials, if a user name is configured.
    pub fn proxy_credentials(&self) -> Option<(&str, &str)> {
        self.proxy_username.as_deref().map(|user| {
            let password = self
                .proxy_password
                .as_ref()
                .map_or("", |p| p.expose_secret().as_str());
            (user, password)
        })
    }

    /// Returns true if any credential is configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() || self.access_token.is_some()
    }
}

impl std::fmt::Debug for QueryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |set: bool| if set { Some("[REDACTED]") } else { None };
        f.debug_struct("QueryConfig")
            .field("api_key", &redacted(self.api_key.is_some()))
            .field("access_token", &redacted(self.access_token.is_some()))
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("rate_limit", &self.rate_limit)
            .field("max_in_flight", &self.max_in_flight)
            .field("proxy_pool", &self.proxy_pool.len())
            .field("proxy_strategy", &self.proxy_strategy)
            .field("proxy_username", &self.proxy_username)
            .field("proxy_password", &redacted(self.proxy_password.is_some()))
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

fn parse_env<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.parse().ok())
}

/// Builder for `QueryConfig`.
#[derive(Default)]
pub struct QueryConfigBuilder {
    api_key: Option<String>,
    access_token: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    max_attempts: Option<u32>,
    retry_base_delay: Option<Duration>,
    qps: Option<f64>,
    burst: Option<u32>,
    max_in_flight: Option<usize>,
    proxy_pool: Vec<String>,
    proxy_strategy: ProxyStrategy,
    proxy_auth: Option<(String, String)>,
    user_agent: Option<String>,
    custom_headers: Vec<(String, String)>,
}

impl QueryConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the access token.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the attempt budget per request.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Sets the linear backoff unit.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Sets the sustained request rate.
    pub fn rate_limit_qps(mut self, qps: f64) -> Self {
        self.qps = Some(qps);
        self
    }

    /// Sets the rate limiter bucket size.
    pub fn rate_limit_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Caps simultaneous transport calls.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }

    /// Adds a proxy URL to the pool.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy_pool.push(proxy.into());
        self
    }

    /// Adds several proxy URLs to the pool.
    pub fn proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxy_pool.extend(proxies.into_iter().map(Into::into));
        self
    }

    /// Sets the proxy selection strategy.
    pub fn proxy_strategy(mut self, strategy: ProxyStrategy) -> Self {
        self.proxy_strategy = strategy;
        self
    }

    /// Sets proxy credentials.
    pub fn proxy_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.proxy_auth = Some((username.into(), password.into()));
        self
    }

    /// Sets the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> QueryResult<QueryConfig> {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let parsed = Url::parse(&base_url).map_err(|e| {
            QueryError::configuration(format!("Invalid base URL '{}': {}", base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(QueryError::configuration("Base URL must use http or https"));
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(QueryError::configuration("Timeout must be greater than zero"));
        }

        let max_attempts = self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(QueryError::configuration("max_attempts must be at least 1"));
        }

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig::new(
            self.qps.unwrap_or(defaults.qps),
            self.burst.unwrap_or(defaults.burst),
        );
        rate_limit
            .validate()
            .map_err(|e| QueryError::configuration(e.to_string()))?;

        if self.max_in_flight == Some(0) {
            return Err(QueryError::configuration("max_in_flight must be at least 1"));
        }

        for proxy in &self.proxy_pool {
            Url::parse(proxy).map_err(|e| {
                QueryError::configuration(format!("Invalid proxy URL '{}': {}", proxy, e))
            })?;
        }

        let secret = |value: Option<String>| {
            value.filter(|v| !v.is_empty()).map(SecretString::new)
        };
        let (proxy_username, proxy_password) = match self.proxy_auth {
            Some((user, pass)) => (Some(user), secret(Some(pass))),
            None => (None, None),
        };

        Ok(QueryConfig {
            api_key: secret(self.api_key),
            access_token: secret(self.access_token),
            base_url,
            timeout,
            max_attempts,
            retry_base_delay: self.retry_base_delay.unwrap_or(DEFAULT_BASE_DELAY),
            rate_limit,
            max_in_flight: self.max_in_flight,
            proxy_pool: self.proxy_pool,
            proxy_strategy: self.proxy_strategy,
            proxy_username,
            proxy_password,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            custom_headers: self.custom_headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = QueryConfig::builder().build().unwrap();

        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(300));
        assert_eq!(config.rate_limit, RateLimitConfig::new(10.0, 20));
        assert_eq!(config.max_in_flight, None);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert!(!config.has_credentials());
        assert!(config.proxy_credentials().is_none());
    }

    #[test]
    fn test_config_builder_success() {
        let config = QueryConfig::builder()
            .api_key("secret-key")
            .base_url("http://localhost:8080/")
            .timeout(Duration::from_secs(2))
            .max_attempts(5)
            .rate_limit_qps(2.5)
            .rate_limit_burst(4)
            .max_in_flight(8)
            .proxy("http://10.0.0.1:3128")
            .proxy_auth("user", "pass")
            .header("x-trace", "1")
            .build()
            .unwrap();

        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.api_key.as_ref().unwrap().expose_secret(), "secret-key");
        assert_eq!(config.retry_config().max_attempts, 5);
        assert_eq!(config.rate_limit, RateLimitConfig::new(2.5, 4));
        assert_eq!(config.proxy_credentials(), Some(("user", "pass")));
        assert_eq!(config.custom_headers.len(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(QueryConfig::builder().base_url("ftp://host").build().is_err());
        assert!(QueryConfig::builder().base_url("not a url").build().is_err());
        assert!(QueryConfig::builder().timeout(Duration::ZERO).build().is_err());
        assert!(QueryConfig::builder().max_attempts(0).build().is_err());
        assert!(QueryConfig::builder().rate_limit_qps(0.0).build().is_err());
        assert!(QueryConfig::builder().rate_limit_qps(f64::NAN).build().is_err());
        assert!(QueryConfig::builder().rate_limit_burst(0).build().is_err());
        assert!(QueryConfig::builder().max_in_flight(0).build().is_err());

        let err = QueryConfig::builder().proxy("::bad::").build().unwrap_err();
        assert!(matches!(err, QueryError::Configuration { .. }));
    }

    #[test]
    fn test_empty_api_key_is_unset() {
        let config = QueryConfig::builder().api_key("").build().unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_from_lookup() {
        let config = QueryConfig::from_lookup(lookup(&[
            ("QUERY_API_KEY", "k"),
            ("QUERY_BASE_URL", "http://127.0.0.1:9000"),
            ("QUERY_TIMEOUT", "1.5"),
            ("QUERY_MAX_ATTEMPTS", "4"),
            ("QUERY_RETRY_BASE_DELAY_MS", "50"),
            ("QUERY_RATE_LIMIT_QPS", "3"),
            ("QUERY_RATE_LIMIT_BURST", "6"),
            ("QUERY_MAX_IN_FLIGHT", "2"),
            ("QUERY_PROXY_POOL", "http://a:1, http://b:2,"),
            ("QUERY_PROXY_STRATEGY", "random"),
            ("QUERY_PROXY_USER", "bob"),
            ("QUERY_USER_AGENT", "tester/1.0"),
        ]))
        .unwrap();

        assert!(config.api_key.is_some());
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.retry_base_delay, Duration::from_millis(50));
        assert_eq!(config.rate_limit, RateLimitConfig::new(3.0, 6));
        assert_eq!(config.max_in_flight, Some(2));
        assert_eq!(config.proxy_pool, vec!["http://a:1", "http://b:2"]);
        assert_eq!(config.proxy_strategy, ProxyStrategy::Random);
        assert_eq!(config.proxy_credentials(), Some(("bob", "")));
        assert_eq!(config.user_agent, "tester/1.0");
    }

    #[test]
    fn test_from_lookup_ignores_unparseable_values() {
        let config = QueryConfig::from_lookup(lookup(&[
            ("QUERY_TIMEOUT", "soon"),
            ("QUERY_MAX_ATTEMPTS", "-1"),
            ("QUERY_RATE_LIMIT_QPS", "fast"),
            ("QUERY_PROXY_STRATEGY", "sticky"),
        ]))
        .unwrap();

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.rate_limit.qps, 10.0);
        assert_eq!(config.proxy_strategy, ProxyStrategy::RoundRobin);
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = QueryConfig::builder()
            .api_key("super_secret_key")
            .access_token("super_secret_token")
            .proxy("http://10.0.0.1:3128")
            .proxy_auth("user", "hunter2")
            .build()
            .unwrap();

        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super_secret"));
        assert!(!debug_str.contains("hunter2"));
    }
}
