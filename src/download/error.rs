//! Error types for the download module.
//!
//! Errors come in two layers:
//! - [`DownloadError`] describes one failed request (a probe or one segment
//!   attempt). Segment workers retry these locally and never propagate them.
//! - [`TransferError`] describes why a whole transfer did not complete. It is
//!   carried in the transfer outcome rather than returned as `Err`.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during a single HTTP request or segment attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// A byte range was requested but the server answered with another status.
    #[error("server ignored range {range} for {url} (HTTP {status})")]
    RangeNotHonored {
        /// The URL that was requested.
        url: String,
        /// The Range header value that was sent.
        range: String,
        /// The status code the server returned instead of 206.
        status: u16,
    },

    /// The response body ended before the requested range was delivered.
    #[error("short body from {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    ShortBody {
        /// The URL that was requested.
        url: String,
        /// Bytes the range should have delivered.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// File system error during download (create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    ///
    /// Timeouts are split out into [`DownloadError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a range-not-honored error.
    pub fn range_not_honored(url: impl Into<String>, range: impl Into<String>, status: u16) -> Self {
        Self::RangeNotHonored {
            url: url.into(),
            range: range.into(),
            status,
        }
    }

    /// Creates a short-body error.
    pub fn short_body(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::ShortBody {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

/// Reasons a transfer ended without producing its destination file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server could not be reached or described before any state was created.
    #[error("could not probe {url}: {source}")]
    Probe {
        /// The URL that was probed.
        url: String,
        /// The request failure.
        #[source]
        source: DownloadError,
    },

    /// Every whole-transfer attempt ended with failed segments.
    #[error(
        "transfer of {url} failed after {attempts} attempts ({failed_segments} segments failed in the last attempt); resume state kept"
    )]
    RetryExhausted {
        /// The URL being transferred.
        url: String,
        /// Whole-transfer attempts made.
        attempts: u32,
        /// Segments that failed during the final attempt.
        failed_segments: usize,
    },

    /// A segment file on disk does not have its planned size.
    #[error("segment {index} at {path} is corrupt: expected {expected_bytes} bytes, found {actual_bytes}")]
    Corruption {
        /// Segment index.
        index: usize,
        /// Segment file path.
        path: PathBuf,
        /// Planned segment size.
        expected_bytes: u64,
        /// Size found on disk.
        actual_bytes: u64,
    },

    /// A segment file expected by the merge does not exist.
    #[error("segment {index} is missing at {path}")]
    MissingSegment {
        /// Segment index.
        index: usize,
        /// Expected segment file path.
        path: PathBuf,
    },

    /// The resume record could not be written.
    #[error("could not persist resume state to {path}: {source}")]
    Persistence {
        /// Resume record path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Local file system failure outside of a segment worker.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A stream resolver could not produce a direct URL.
    #[error("could not resolve {source_url}: {message}")]
    Resolve {
        /// The page URL handed to the resolver.
        source_url: String,
        /// Resolver-provided description.
        message: String,
    },

    /// `start` was called while the same transfer was already running.
    #[error("transfer of {url} is already running")]
    AlreadyRunning {
        /// The URL being transferred.
        url: String,
    },
}

impl TransferError {
    /// Creates a probe error.
    pub fn probe(url: impl Into<String>, source: DownloadError) -> Self {
        Self::Probe {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a persistence error.
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Creates a corruption error.
    pub fn corruption(
        index: usize,
        path: impl Into<PathBuf>,
        expected_bytes: u64,
        actual_bytes: u64,
    ) -> Self {
        Self::Corruption {
            index,
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a missing-segment error.
    pub fn missing_segment(index: usize, path: impl Into<PathBuf>) -> Self {
        Self::MissingSegment {
            index,
            path: path.into(),
        }
    }

    /// Creates a resolver error.
    pub fn resolve(source_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolve {
            source_url: source_url.into(),
            message: message.into(),
        }
    }
}

// Note on From trait implementations:
// We do NOT implement `From<reqwest::Error>` or `From<std::io::Error>` because
// every variant needs context (url, path) the source errors don't provide.
// The helper constructors are the intended way to build these errors.
