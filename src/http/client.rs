//! HTTP client with retry and rate limiting
//!
//! Handles:
//! - Credential and integration header injection
//! - Automatic retries on 5xx and 429 with backoff
//! - `X-RateLimit-Reset` hints on throttled responses
//! - Cancellation of in-flight requests and backoff sleeps

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::error::{is_retryable_status, Error, Result};
use crate::types::BackoffType;
use base64::Engine as _;
use bytes::Bytes;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Span};

/// Header carrying a per-request correlation id
const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Seconds until the rate limit window resets
const RATE_LIMIT_RESET_HEADER: &str = "X-RateLimit-Reset";

/// How the client authenticates
#[derive(Clone)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Basic base64(user:password)`
    Basic { username: String, password: String },
}

impl Credentials {
    pub(crate) fn header_value(&self) -> String {
        match self {
            Credentials::Bearer(token) => format!("Bearer {token}"),
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{username}:{password}"));
                format!("Basic {encoded}")
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Bearer(_) => f.write_str("Bearer(***)"),
            Credentials::Basic { username, .. } => write!(f, "Basic({username}:***)"),
        }
    }
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for relative paths
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Initial delay for backoff
    pub initial_backoff: Duration,
    /// Maximum delay for backoff
    pub max_backoff: Duration,
    /// Type of backoff strategy
    pub backoff_type: BackoffType,
    /// Client-side throttle
    pub rate_limit: Option<RateLimiterConfig>,
    /// Headers sent with every request
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
    /// Authorization
    pub credentials: Option<Credentials>,
    /// HTTP(S) proxy
    pub proxy_url: Option<String>,
    /// Extra trusted root certificate (PEM)
    pub tls_cert_pem: Option<Vec<u8>>,
    /// Accept invalid certificates
    pub tls_skip_verify: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        let mut default_headers = HashMap::new();
        default_headers.insert(
            "sc-integration-id".to_string(),
            "safetyculture-exporter".to_string(),
        );
        default_headers.insert(
            "sc-integration-version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );

        Self {
            base_url: None,
            timeout: Duration::from_secs(60),
            max_retries: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
            rate_limit: None,
            default_headers,
            user_agent: format!("feed-exporter/{}", env!("CARGO_PKG_VERSION")),
            credentials: None,
            proxy_url: None,
            tls_cert_pem: None,
            tls_skip_verify: false,
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set max retries
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set backoff configuration
    #[must_use]
    pub fn backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.config.backoff_type = backoff_type;
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set rate limiter
    #[must_use]
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    /// Add a default header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Authenticate with a bearer token
    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials::Bearer(token.into()));
        self
    }

    /// Authenticate with a username and password
    #[must_use]
    pub fn basic(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Route requests through a proxy
    #[must_use]
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(url.into());
        self
    }

    /// Trust an extra PEM certificate
    #[must_use]
    pub fn tls_cert_pem(mut self, pem: Vec<u8>) -> Self {
        self.config.tls_cert_pem = Some(pem);
        self
    }

    /// Accept invalid certificates
    #[must_use]
    pub fn tls_skip_verify(mut self, skip: bool) -> Self {
        self.config.tls_skip_verify = skip;
        self
    }

    /// Set user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters, repeated keys allowed
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body (JSON)
    pub body: Option<Value>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add many query parameters
    #[must_use]
    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A downloaded binary body
#[derive(Debug, Clone)]
pub struct Download {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Identity of the token owner
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhoAmI {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub organisation_id: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
}

/// HTTP client with retry and rate limiting
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<RateLimiter>,
    cancel: CancellationToken,
    span: Span,
}

impl HttpClient {
    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(config.tls_skip_verify);

        if let Some(ref proxy) = config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        if let Some(ref pem) = config.tls_cert_pem {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }

        let client = builder.build()?;
        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(Self {
            client,
            config,
            rate_limiter,
            cancel: CancellationToken::new(),
            span: Span::none(),
        })
    }

    /// Share a cancellation token with the rest of the run
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Parent log events on `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Token observed by every request
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Base URL, if any
    pub fn base_url(&self) -> Option<&str> {
        self.config.base_url.as_deref()
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::GET, url, config).await
    }

    /// Make a POST request with a JSON body
    pub async fn post(&self, url: &str, body: Value) -> Result<Response> {
        self.request(Method::POST, url, RequestConfig::new().json(body))
            .await
    }

    /// Make a request, retrying 5xx, 429 and transient network errors
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
    ) -> Result<Response> {
        let full_url = self.build_url(url);
        let max_retries = self.config.max_retries;
        let timeout = config.timeout.unwrap_or(self.config.timeout);

        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(ref limiter) = self.rate_limiter {
                limiter.wait().await;
            }

            let req = self.build_request(&method, &full_url, &config, timeout);
            let sent = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                sent = req.send() => sent,
            };

            let (failure, delay) = match sent {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() || status.is_redirection() {
                        debug!(parent: &self.span, "{} {} -> {}", method, full_url, status.as_u16());
                        return Ok(response);
                    }

                    if !is_retryable_status(status.as_u16()) {
                        let body = response.text().await.unwrap_or_default();
                        return Err(Error::http_status(status.as_u16(), &full_url, body));
                    }

                    let delay = if status == StatusCode::TOO_MANY_REQUESTS {
                        rate_limit_delay(response.headers())
                            .unwrap_or_else(|| self.calculate_backoff(attempt))
                    } else {
                        self.calculate_backoff(attempt)
                    };
                    let body = response.text().await.unwrap_or_default();
                    (Error::http_status(status.as_u16(), &full_url, body), delay)
                }
                Err(e) if e.is_timeout() => (
                    Error::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    self.calculate_backoff(attempt),
                ),
                Err(e) if e.is_connect() => (Error::Http(e), self.calculate_backoff(attempt)),
                Err(e) => return Err(Error::Http(e)),
            };

            if attempt >= max_retries {
                return Err(Error::MaxRetriesExceeded {
                    url: full_url,
                    attempts: attempt + 1,
                    source: Box::new(failure),
                });
            }

            warn!(
                parent: &self.span,
                "{} {} failed ({}), attempt {}/{}, retrying in {:?}",
                method,
                full_url,
                failure,
                attempt + 1,
                max_retries + 1,
                delay
            );
            self.sleep(delay).await?;
            attempt += 1;
        }
    }

    /// Make a request and parse the JSON response
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
    ) -> Result<T> {
        let response = self.request(method, url, config).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Error::from)
    }

    /// GET and parse JSON
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, config: RequestConfig) -> Result<T> {
        self.request_json(Method::GET, url, config).await
    }

    /// POST a JSON body and parse JSON
    pub async fn post_json<T: DeserializeOwned>(&self, url: &str, body: Value) -> Result<T> {
        self.request_json(Method::POST, url, RequestConfig::new().json(body))
            .await
    }

    /// GET a binary body
    pub async fn get_bytes(&self, url: &str) -> Result<Download> {
        let response = self.request(Method::GET, url, RequestConfig::new()).await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await?;
        Ok(Download {
            status,
            content_type,
            body,
        })
    }

    /// Identify the token owner and their organisation
    pub async fn who_am_i(&self) -> Result<WhoAmI> {
        self.get_json("accounts/user/v1/user:WhoAmI", RequestConfig::new())
            .await
    }

    /// Sleep unless the run is cancelled first
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        config: &RequestConfig,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method.clone(), url)
            .timeout(timeout)
            .header(REQUEST_ID_HEADER, uuid::Uuid::new_v4().to_string());

        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(ref credentials) = self.config.credentials {
            req = req.header(AUTHORIZATION, credentials.header_value());
        }
        for (key, value) in &config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            req = req.query(&config.query);
        }
        if let Some(ref body) = config.body {
            req = req.json(body);
        }
        req
    }

    /// Build full URL from path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        match &self.config.base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = path.trim_start_matches('/');
                format!("{base}/{path}")
            }
            None => path.to_string(),
        }
    }

    /// Calculate backoff delay for a given attempt
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let delay = match self.config.backoff_type {
            BackoffType::Constant => self.config.initial_backoff,
            BackoffType::Linear => self.config.initial_backoff * (attempt + 1),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                self.config.initial_backoff.saturating_mul(factor)
            }
        };

        std::cmp::min(delay, self.config.max_backoff)
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

/// Delay requested by a throttled response: reset seconds plus one
fn rate_limit_delay(headers: &HeaderMap) -> Option<Duration> {
    let seconds = |name: &str| -> Option<u64> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
    };

    seconds(RATE_LIMIT_RESET_HEADER)
        .map(|s| Duration::from_secs(s + 1))
        .or_else(|| seconds("retry-after").map(Duration::from_secs))
}
