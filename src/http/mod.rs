//! API client
//!
//! HTTP client for the inspection platform API with retry, rate limiting
//! and cancellation.
//!
//! # Features
//!
//! - **Automatic Retries**: 5xx and 429 are retried with backoff up to a fixed ceiling
//! - **Rate Limit Hints**: honours `X-RateLimit-Reset` on 429 responses
//! - **Fail Fast on 4xx**: client errors (403 included) are returned to the caller
//! - **Cancellation**: every request and backoff sleep observes a shared token

mod client;
mod rate_limit;

pub use client::{
    Credentials, Download, HttpClient, HttpClientConfig, HttpClientConfigBuilder, RequestConfig,
    WhoAmI,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
