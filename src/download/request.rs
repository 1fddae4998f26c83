//! The immutable description of what to download and where.

use std::path::{Path, PathBuf};

use super::constants::DEFAULT_WORKERS;
use super::filename::{derive_filename, sanitize_filename};

/// What to transfer and where to put it.
///
/// `(url, filename)` is the resume identity: a resume record is only reused
/// when both match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    url: String,
    output_dir: PathBuf,
    filename: String,
    workers: usize,
    size_hint: Option<u64>,
}

impl TransferRequest {
    /// Creates a request saving into `output_dir` under a name derived from the URL.
    #[must_use]
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        let url = url.into();
        let filename = derive_filename(&url);
        Self {
            url,
            output_dir: output_dir.into(),
            filename,
            workers: DEFAULT_WORKERS,
            size_hint: None,
        }
    }

    /// Creates a request writing to an explicit output file.
    ///
    /// A path without a file name component falls back to URL derivation.
    #[must_use]
    pub fn to_file(url: impl Into<String>, output_file: &Path) -> Self {
        let url = url.into();
        let filename = output_file
            .file_name()
            .map(|name| sanitize_filename(&name.to_string_lossy()))
            .unwrap_or_else(|| derive_filename(&url));
        let output_dir = output_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            url,
            output_dir,
            filename,
            workers: DEFAULT_WORKERS,
            size_hint: None,
        }
    }

    /// Sets the requested worker count (a hint; resumed transfers keep their original count).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Overrides the derived filename.
    #[must_use]
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = sanitize_filename(filename);
        self
    }

    /// Records a size reported out of band, used when the server omits `Content-Length`.
    #[must_use]
    pub fn with_size_hint(mut self, size: Option<u64>) -> Self {
        self.size_hint = size;
        self
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory receiving the output, resume record and segment files.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output filename (resume identity).
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Requested worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Out-of-band size, if any.
    #[must_use]
    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    /// Final destination path.
    #[must_use]
    pub fn destination(&self) -> PathBuf {
        self.output_dir.join(&self.filename)
    }
}
