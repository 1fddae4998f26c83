//! Capability probing: total size and byte-range support.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap};
use tracing::{debug, info, instrument, warn};

use super::HttpClient;
use super::error::DownloadError;

/// What the server told us about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes, when the server reported one.
    pub total_size: Option<u64>,
    /// Whether `Range` requests are honoured.
    pub accepts_ranges: bool,
}

/// Probes `url` for its size and range support.
///
/// Issues a HEAD request. Servers that reject HEAD (405, 501) are probed with
/// a one-byte ranged GET instead.
///
/// # Errors
///
/// Returns `DownloadError` when neither request yields a usable answer.
#[instrument(skip(client))]
pub async fn probe(client: &HttpClient, url: &str) -> Result<ProbeResult, DownloadError> {
    match client.head(url).await {
        Ok(response) => {
            let result = from_head_headers(response.headers());
            log_probe(&result);
            Ok(result)
        }
        Err(DownloadError::HttpStatus { status, .. }) if matches!(status, 405 | 501) => {
            debug!(status, "HEAD rejected, probing with ranged GET");
            let response = client.probe_get(url, "bytes=0-0").await?;
            let result = from_ranged_get(response.status(), response.headers());
            log_probe(&result);
            Ok(result)
        }
        Err(error) => Err(error),
    }
}

fn log_probe(result: &ProbeResult) {
    info!(
        total_size = ?result.total_size,
        accepts_ranges = result.accepts_ranges,
        "probed resource"
    );
    if result.total_size.is_none() {
        warn!("server did not provide Content-Length; progress percentage and resume are unavailable");
    }
    if !result.accepts_ranges {
        warn!("server does not support ranged requests; using a single stream");
    }
}

fn from_head_headers(headers: &HeaderMap) -> ProbeResult {
    ProbeResult {
        total_size: content_length(headers),
        accepts_ranges: accepts_ranges(headers),
    }
}

fn from_ranged_get(status: StatusCode, headers: &HeaderMap) -> ProbeResult {
    if status == StatusCode::PARTIAL_CONTENT {
        let total_size = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(content_range_total);
        return ProbeResult {
            total_size,
            accepts_ranges: true,
        };
    }
    ProbeResult {
        total_size: content_length(headers),
        accepts_ranges: false,
    }
}

/// Reads `Content-Length` straight from the headers.
///
/// `Response::content_length` reflects the body, which is empty for HEAD.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn accepts_ranges(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
        })
}

/// Extracts the complete length from `bytes 0-0/12345`.
fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse::<u64>().ok()
}
