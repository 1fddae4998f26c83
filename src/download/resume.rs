//! Durable resume state: one JSON record plus a directory of segment files.
//!
//! Layout for a transfer saving `<dir>/<filename>`:
//!
//! ```text
//! <dir>/<filename>.resume          resume record (JSON)
//! <dir>/<filename>.resume.tmp      staging file for atomic replacement
//! <dir>/.<filename>.parts/part_N   bytes of segment N
//! ```
//!
//! The record is the only resume signal. It is replaced atomically (write the
//! staging file, flush, fsync, rename), so readers never see a partial record.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::constants::{PERSIST_ATTEMPTS, PERSIST_RETRY_DELAY};
use super::error::TransferError;
use super::request::TransferRequest;

/// File extension of resume records.
pub const RESUME_EXTENSION: &str = "resume";

/// Prefix of segment file names inside the parts directory.
const PART_PREFIX: &str = "part_";

/// Persisted snapshot of per-segment progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    /// Source URL (identity).
    pub url: String,
    /// Output filename (identity).
    pub filename: String,
    /// Total size in bytes.
    pub file_size: u64,
    /// Bytes downloaded per segment index.
    pub parts: BTreeMap<usize, u64>,
    /// Seconds since the Unix epoch when the record was written.
    pub timestamp: u64,
    /// Worker count that fixed the segment boundaries.
    pub original_worker_count: usize,
}

impl ResumeRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        filename: impl Into<String>,
        file_size: u64,
        parts: BTreeMap<usize, u64>,
        original_worker_count: usize,
    ) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            file_size,
            parts,
            timestamp: unix_now(),
            original_worker_count,
        }
    }

    /// Sum of downloaded bytes across segments.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.parts.values().sum()
    }

    /// Checks internal consistency (not identity).
    fn validate_shape(&self) -> Result<(), String> {
        if self.original_worker_count == 0 {
            return Err("original_worker_count is zero".to_string());
        }
        let expected: Vec<usize> = (0..self.original_worker_count).collect();
        let actual: Vec<usize> = self.parts.keys().copied().collect();
        if expected != actual {
            return Err(format!(
                "parts {actual:?} do not match original_worker_count {}",
                self.original_worker_count
            ));
        }
        if self.downloaded() > self.file_size {
            return Err(format!(
                "downloaded {} exceeds file_size {}",
                self.downloaded(),
                self.file_size
            ));
        }
        Ok(())
    }
}

/// Loads, saves and clears the resume state of one transfer.
#[derive(Debug)]
pub struct ResumeStore {
    output_dir: PathBuf,
    filename: String,
    record_path: PathBuf,
    temp_path: PathBuf,
    parts_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ResumeStore {
    /// Creates the store for `request`. Nothing is touched on disk.
    #[must_use]
    pub fn new(request: &TransferRequest) -> Self {
        Self::at(request.output_dir(), request.filename())
    }

    /// Creates the store for `filename` inside `output_dir`.
    #[must_use]
    pub fn at(output_dir: &Path, filename: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            filename: filename.to_string(),
            record_path: output_dir.join(format!("{filename}.{RESUME_EXTENSION}")),
            temp_path: output_dir.join(format!("{filename}.{RESUME_EXTENSION}.tmp")),
            parts_dir: output_dir.join(format!(".{filename}.parts")),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the resume record.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Directory holding segment files.
    #[must_use]
    pub fn parts_dir(&self) -> &Path {
        &self.parts_dir
    }

    /// Path of the file backing segment `index`.
    #[must_use]
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.parts_dir.join(format!("{PART_PREFIX}{index}"))
    }

    /// Whether a record file currently exists.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.record_path)
            .await
            .unwrap_or(false)
    }

    /// Loads the record if it exists and belongs to `request`.
    ///
    /// Unreadable, malformed or foreign records are treated as absent, and the
    /// store is cleared so they cannot be picked up later.
    #[instrument(skip(self, request), fields(record = %self.record_path.display()))]
    pub async fn load(&self, request: &TransferRequest) -> Option<ResumeRecord> {
        let raw = match tokio::fs::read_to_string(&self.record_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "could not read resume record");
                self.clear_logged().await;
                return None;
            }
        };

        let record = match serde_json::from_str::<ResumeRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "invalid resume record, discarding");
                self.clear_logged().await;
                return None;
            }
        };

        if let Err(reason) = Self::validate_identity(&record, request) {
            warn!(%reason, "resume record does not match this transfer, discarding");
            self.clear_logged().await;
            return None;
        }
        if let Err(reason) = record.validate_shape() {
            warn!(%reason, "inconsistent resume record, discarding");
            self.clear_logged().await;
            return None;
        }

        info!(
            downloaded = record.downloaded(),
            file_size = record.file_size,
            original_worker_count = record.original_worker_count,
            "found resume record"
        );
        Some(record)
    }

    fn validate_identity(record: &ResumeRecord, request: &TransferRequest) -> Result<(), String> {
        if record.url != request.url() {
            return Err(format!("URL mismatch: {}", record.url));
        }
        if record.filename != request.filename() {
            return Err(format!("filename mismatch: {}", record.filename));
        }
        Ok(())
    }

    /// Atomically replaces the record on disk.
    ///
    /// Concurrent callers are serialized. The write is retried a few times
    /// before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Persistence`] when every attempt failed. The
    /// transfer can continue; only the checkpoint is lost.
    pub async fn save(&self, record: &ResumeRecord) -> Result<(), TransferError> {
        let _guard = self.write_lock.lock().await;
        let payload = serde_json::to_vec(record)
            .map_err(|e| TransferError::persistence(&self.record_path, e.into()))?;

        let mut last_error = None;
        for attempt in 1..=PERSIST_ATTEMPTS {
            match self.write_atomically(&payload).await {
                Ok(()) => {
                    debug!(
                        attempt,
                        downloaded = record.downloaded(),
                        "resume record saved"
                    );
                    return Ok(());
                }
                Err(e) => {
                    debug!(attempt, error = %e, "resume record write failed");
                    last_error = Some(e);
                    if attempt < PERSIST_ATTEMPTS {
                        tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                    }
                }
            }
        }

        let source = last_error.unwrap_or_else(|| std::io::Error::other("no write attempted"));
        error!(
            path = %self.record_path.display(),
            attempts = PERSIST_ATTEMPTS,
            error = %source,
            "failed to save resume record"
        );
        self.diagnose_directory_permissions().await;
        Err(TransferError::persistence(&self.record_path, source))
    }

    async fn write_atomically(&self, payload: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let mut file = tokio::fs::File::create(&self.temp_path).await?;
        file.write_all(payload).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&self.temp_path, &self.record_path).await
    }

    async fn diagnose_directory_permissions(&self) {
        let probe = self.output_dir.join(format!(".{}.write-test", self.filename));
        match tokio::fs::write(&probe, b"test").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&probe).await;
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                error!(
                    dir = %self.output_dir.display(),
                    "no write permission in output directory; choose another directory or fix its permissions"
                );
            }
            Err(e) => {
                error!(dir = %self.output_dir.display(), error = %e, "output directory is not writable");
            }
        }
    }

    /// Removes the record, its staging file and every segment file.
    ///
    /// Idempotent: missing files are not errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] when an existing file cannot be removed.
    pub async fn clear(&self) -> Result<(), TransferError> {
        remove_if_exists(&self.record_path).await?;
        remove_if_exists(&self.temp_path).await?;

        match tokio::fs::read_dir(&self.parts_dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| TransferError::io(&self.parts_dir, e))?
                {
                    if entry.file_name().to_string_lossy().starts_with(PART_PREFIX) {
                        remove_if_exists(&entry.path()).await?;
                    }
                }
                if let Err(e) = tokio::fs::remove_dir(&self.parts_dir).await {
                    warn!(dir = %self.parts_dir.display(), error = %e, "could not remove parts directory");
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(TransferError::io(&self.parts_dir, e)),
        }
        debug!(record = %self.record_path.display(), "resume state cleared");
        Ok(())
    }

    async fn clear_logged(&self) {
        if let Err(e) = self.clear().await {
            warn!(error = %e, "failed to clear resume state");
        }
    }

    /// Lists every readable resume record in `dir`, sorted by filename.
    ///
    /// Unreadable records are skipped with a debug log.
    pub async fn scan(dir: &Path) -> Vec<ResumeRecord> {
        let mut records = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return records;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RESUME_EXTENSION) {
                continue;
            }
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .ok()
                .and_then(|raw| serde_json::from_str::<ResumeRecord>(&raw).ok());
            match parsed {
                Some(record) => records.push(record),
                None => debug!(path = %path.display(), "skipping unreadable resume record"),
            }
        }
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        records
    }
}

/// Writes resume records for one running transfer.
///
/// Holds the fixed identity fields so callers only supply segment counters.
#[derive(Debug, Clone)]
pub struct Checkpointer {
    store: Arc<ResumeStore>,
    url: String,
    filename: String,
    file_size: u64,
    original_worker_count: usize,
}

impl Checkpointer {
    /// Creates a checkpointer for a resumable plan.
    #[must_use]
    pub fn new(
        store: Arc<ResumeStore>,
        request: &TransferRequest,
        file_size: u64,
        original_worker_count: usize,
    ) -> Self {
        Self {
            store,
            url: request.url().to_string(),
            filename: request.filename().to_string(),
            file_size,
            original_worker_count,
        }
    }

    /// Builds the record for `parts`.
    #[must_use]
    pub fn record(&self, parts: BTreeMap<usize, u64>) -> ResumeRecord {
        ResumeRecord::new(
            self.url.clone(),
            self.filename.clone(),
            self.file_size,
            parts,
            self.original_worker_count,
        )
    }

    /// Saves `parts`, logging instead of failing. Returns whether it was written.
    pub async fn save(&self, parts: BTreeMap<usize, u64>) -> bool {
        match self.store.save(&self.record(parts)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "checkpoint not saved, continuing");
                false
            }
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), TransferError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransferError::io(path, e)),
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
