//! HTTP client wrapper for probing and ranged requests.
//!
//! This module provides the `HttpClient` struct which owns one pooled reqwest
//! session with the engine's connect/read timeouts. The supervisor replaces
//! the whole client between whole-transfer attempts.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{RANGE, RETRY_AFTER};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, PROBE_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("segfetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client for probing and segment downloads.
///
/// Cloning is cheap and shares the connection pool.
///
/// # Example
///
/// ```no_run
/// use segfetch_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let response = client.get("https://example.com/file.iso", Some("bytes=0-1023")).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// The read timeout applies to each read from the socket, not to the whole
    /// body, so long segments are not cut off while data keeps flowing.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Self {
        let client = build_client(connect_timeout, read_timeout)
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// Sends a metadata-only HEAD request with the short probe timeout.
    ///
    /// Redirects are followed. Non-2xx statuses become [`DownloadError::HttpStatus`].
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on invalid URL, network failure, timeout or
    /// error status.
    #[instrument(level = "debug", skip(self))]
    pub async fn head(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        validate_url(url)?;
        let request = self
            .client
            .head(url)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS));
        send_checked(request, url).await
    }

    /// Sends a GET request, optionally with a `Range` header value.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` on invalid URL, network failure, timeout or
    /// error status.
    #[instrument(level = "debug", skip(self))]
    pub async fn get(
        &self,
        url: &str,
        range: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        validate_url(url)?;
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        send_checked(request, url).await
    }

    /// Sends a GET with the probe timeout; used when HEAD is rejected.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn probe_get(
        &self,
        url: &str,
        range: &str,
    ) -> Result<reqwest::Response, DownloadError> {
        validate_url(url)?;
        let request = self
            .client
            .get(url)
            .header(RANGE, range)
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS));
        send_checked(request, url).await
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if matches!(parsed.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(DownloadError::invalid_url(url))
    }
}

async fn send_checked(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, DownloadError> {
    let response = request
        .send()
        .await
        .map_err(|e| DownloadError::network(url, e))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        debug!(status = status.as_u16(), "request returned error status");
        return Err(DownloadError::http_status_with_retry_after(
            url,
            status.as_u16(),
            retry_after,
        ));
    }

    Ok(response)
}

fn build_client(connect_timeout: Duration, read_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .user_agent(DEFAULT_USER_AGENT)
        .build()
}
