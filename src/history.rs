//! Download history kept next to the downloads.
//!
//! `<output_dir>/downloads_history.json` holds two lists. Each finished run
//! moves its URL's entry into `completed` or `incomplete`, so a URL appears at
//! most once across both.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::download::{TransferError, TransferOutcome, TransferStatus};

/// File name of the history file inside the output directory.
pub const HISTORY_FILENAME: &str = "downloads_history.json";

/// One history line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Source URL.
    pub url: String,
    /// Output filename.
    pub filename: String,
    /// Destination path.
    pub path: PathBuf,
    /// Bytes on disk when the run ended.
    pub bytes: u64,
    /// `completed`, `paused` or `failed`.
    pub status: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl HistoryEntry {
    /// Builds an entry describing `outcome`.
    #[must_use]
    pub fn from_outcome(url: &str, outcome: &TransferOutcome) -> Self {
        let filename = outcome
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let status = match outcome.status {
            TransferStatus::Completed => "completed",
            TransferStatus::Paused => "paused",
            TransferStatus::Failed => "failed",
        };
        Self {
            url: url.to_string(),
            filename,
            path: outcome.path.clone(),
            bytes: outcome.bytes_downloaded,
            status: status.to_string(),
            timestamp: crate::download::unix_now(),
        }
    }
}

/// The two history lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// Runs that produced their destination.
    #[serde(default)]
    pub completed: Vec<HistoryEntry>,
    /// Runs that paused or failed.
    #[serde(default)]
    pub incomplete: Vec<HistoryEntry>,
}

impl History {
    /// Files `entry` under the list for `completed`, replacing any entry for the same URL.
    pub fn record(&mut self, entry: HistoryEntry, completed: bool) {
        self.completed.retain(|existing| existing.url != entry.url);
        self.incomplete.retain(|existing| existing.url != entry.url);
        if completed {
            self.completed.push(entry);
        } else {
            self.incomplete.push(entry);
        }
    }
}

/// Reads and writes the history file of one output directory.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Creates the store for `output_dir`.
    #[must_use]
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(HISTORY_FILENAME),
        }
    }

    /// Path of the history file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the history. Missing or unreadable files yield an empty history.
    pub async fn load(&self) -> History {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "history file is corrupt, starting fresh");
                History::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => History::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not read history file");
                History::default()
            }
        }
    }

    /// Records the outcome of one run.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Io`] when the history file cannot be written.
    pub async fn record(&self, url: &str, outcome: &TransferOutcome) -> Result<(), TransferError> {
        let mut history = self.load().await;
        history.record(HistoryEntry::from_outcome(url, outcome), outcome.is_success());
        self.save(&history).await?;
        debug!(url, status = ?outcome.status, "history updated");
        Ok(())
    }

    async fn save(&self, history: &History) -> Result<(), TransferError> {
        let payload = serde_json::to_vec_pretty(history)
            .map_err(|e| TransferError::io(&self.path, e.into()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| TransferError::io(&staging, e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| TransferError::io(&staging, e))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::io(&staging, e))?;
        drop(file);
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| TransferError::io(&self.path, e))
    }
}
