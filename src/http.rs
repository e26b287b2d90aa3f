//! HTTP client with rate limiting for the media backend APIs.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to respect each backend's API quota
//! * Consistent timeouts and headers
//! * Mapping of non-success statuses onto [`ErrorKind`](crate::error::ErrorKind)
//!
//! # Rate Limiting
//!
//! Every backend owns its own client, and so its own limiter. Requests that
//! would exceed the limit are delayed, not rejected; bursts up to the
//! per-interval maximum are allowed.

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    self,
    header::{HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE},
    Method, Url,
};
use serde::de::DeserializeOwned;

use crate::{
    config::Config,
    error::{Error, Result},
};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Direct access to the underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Duration to keep idle connections alive.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a new client allowing `calls` requests per `interval`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * HTTP client creation fails
    /// * the rate limit parameters are zero
    pub fn new(config: &Config, interval: Duration, calls: u32) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));

        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .timeout(config.backend_timeout)
            .default_headers(headers)
            .user_agent(HeaderValue::from_str(&config.user_agent)?);

        // Rate limit own requests as to not DoS the backend infrastructure.
        let burst = NonZeroU32::new(calls)
            .ok_or_else(|| Error::invalid_argument("calls per interval is zero"))?;
        let quota = Quota::with_period(interval / calls)
            .ok_or_else(|| Error::invalid_argument("quota time interval is zero"))?
            .allow_burst(burst);

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a GET request with the given query pairs.
    #[must_use]
    pub fn get(&self, mut url: Url, query: &[(&str, &str)]) -> reqwest::Request {
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        reqwest::Request::new(Method::GET, url)
    }

    /// Starts a POST request with a form-encoded body. Callers add
    /// authentication and build it.
    #[must_use]
    pub fn post_form(&self, url: Url, form: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();

        self.unlimited
            .post(url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .body(body)
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails at the network level. The status
    /// code is not inspected; see [`Client::json`].
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }

    /// Executes a request and deserializes a successful JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error classified by status code (404 `NotFound`, 429
    /// `ResourceExhausted`, 5xx `Unavailable` and so on) or when the body
    /// does not deserialize.
    pub async fn json<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        let url = request.url().clone();
        let response = self.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let host = url.host_str().unwrap_or_default().to_owned();
            return Err(Error::from_status(
                status,
                format!("{host}{} returned {status}", url.path()),
            ));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
