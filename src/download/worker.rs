//! Segment worker: downloads one byte range into its own part file.
//!
//! A worker never returns an error. Request failures are retried under the
//! local [`RetryPolicy`]; once that budget is spent the worker bumps the shared
//! error count and reports [`SegmentOutcome::Failed`] so the supervisor can
//! decide whether to run another whole-transfer attempt.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, error, info, instrument, warn};

use super::constants::{CANCEL_CHECK_INTERVAL, CHECKPOINT_INTERVAL};
use super::planner::Segment;
use super::progress::SharedProgress;
use super::resume::Checkpointer;
use super::retry::{RetryDecision, RetryPolicy, classify_error, retry_after_delay};
use super::{DownloadError, HttpClient};

/// How a segment worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Every planned byte is on disk.
    Completed,
    /// The shutdown flag was raised; the part file is intact.
    Cancelled,
    /// The local retry budget is exhausted.
    Failed,
}

/// Everything one worker needs. Owned by the spawned task.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    /// HTTP client for this whole-transfer attempt.
    pub client: HttpClient,
    /// Source URL.
    pub url: String,
    /// The byte range to fetch.
    pub segment: Segment,
    /// Whether closed byte ranges are used.
    pub ranged: bool,
    /// Part file owned by this worker.
    pub path: PathBuf,
    /// Shared counters.
    pub progress: Arc<SharedProgress>,
    /// Resume checkpointing; `None` for non-resumable plans.
    pub checkpointer: Option<Checkpointer>,
    /// Local retry policy.
    pub policy: RetryPolicy,
    /// Cooperative cancellation flag.
    pub shutdown: Arc<AtomicBool>,
}

enum AttemptEnd {
    Finished,
    Cancelled,
}

/// Runs one segment to completion, cancellation, or exhausted retries.
#[instrument(skip(job), fields(segment = job.segment.index, start = job.segment.start))]
pub async fn run_segment(job: SegmentJob) -> SegmentOutcome {
    let index = job.segment.index;
    let mut attempt = 0u32;

    loop {
        if job.shutdown.load(Ordering::SeqCst) {
            debug!("shutdown requested before attempt");
            return SegmentOutcome::Cancelled;
        }
        attempt += 1;

        let error = match download_attempt(&job).await {
            Ok(AttemptEnd::Finished) => {
                job.progress.mark_finished(index);
                debug!(attempt, "segment complete");
                return SegmentOutcome::Completed;
            }
            Ok(AttemptEnd::Cancelled) => {
                debug!("segment cancelled");
                return SegmentOutcome::Cancelled;
            }
            Err(error) => error,
        };

        match job.policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay: backoff,
                attempt: next_attempt,
            } => {
                let server_delay = retry_after_delay(&error);
                let delay = server_delay.unwrap_or(backoff);
                warn!(
                    attempt = next_attempt,
                    max_attempts = job.policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    using_retry_after = server_delay.is_some(),
                    error = %error,
                    "retrying segment"
                );
                if !sleep_unless_cancelled(delay, &job.shutdown).await {
                    return SegmentOutcome::Cancelled;
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                error!(attempts = attempt, %reason, error = %error, "segment failed");
                job.progress.record_error();
                return SegmentOutcome::Failed;
            }
        }
    }
}

/// Sleeps for `duration`, waking early if `shutdown` is raised.
///
/// Returns `false` when cancelled.
pub async fn sleep_unless_cancelled(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL)).await;
    }
}

async fn download_attempt(job: &SegmentJob) -> Result<AttemptEnd, DownloadError> {
    let index = job.segment.index;
    let mut downloaded = job.progress.segment_downloaded(index);

    if job.segment.is_complete(downloaded) {
        // Zero-length and already-complete segments still need a part file.
        open_part(&job.path, downloaded).await?;
        return Ok(AttemptEnd::Finished);
    }

    let range = job.segment.range_header(downloaded, job.ranged);
    let response = job.client.get(&job.url, range.as_deref()).await?;
    let status = response.status();

    if let Some(range) = &range {
        if status == StatusCode::OK && !job.ranged {
            info!(offset = downloaded, "server restarted from the beginning, discarding partial data");
            job.progress.reset_segment(index, 0);
            downloaded = 0;
        } else if status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::range_not_honored(
                &job.url,
                range,
                status.as_u16(),
            ));
        }
    }

    let mut file = open_part(&job.path, downloaded).await?;
    let streamed = stream_body(job, response, &mut file, downloaded).await;
    file.flush()
        .await
        .map_err(|e| DownloadError::io(&job.path, e))?;
    streamed
}

/// Opens the part file positioned at `offset`, discarding anything beyond it.
async fn open_part(path: &Path, offset: u64) -> Result<File, DownloadError> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.set_len(offset)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    Ok(file)
}

async fn stream_body(
    job: &SegmentJob,
    response: reqwest::Response,
    file: &mut File,
    downloaded: u64,
) -> Result<AttemptEnd, DownloadError> {
    let index = job.segment.index;
    let remaining = job.segment.remaining(downloaded);
    let mut received = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if job.shutdown.load(Ordering::SeqCst) {
            return Ok(AttemptEnd::Cancelled);
        }
        let chunk = chunk.map_err(|e| DownloadError::network(&job.url, e))?;

        let wanted = match remaining {
            Some(remaining) => {
                let left = remaining - received;
                usize::try_from(left).map_or(chunk.len(), |left| left.min(chunk.len()))
            }
            None => chunk.len(),
        };
        if wanted < chunk.len() {
            debug!(extra = chunk.len() - wanted, "discarding bytes beyond segment end");
        }

        file.write_all(&chunk[..wanted])
            .await
            .map_err(|e| DownloadError::io(&job.path, e))?;
        received += wanted as u64;
        job.progress.add(index, wanted as u64);
        checkpoint(job).await;

        if remaining == Some(received) {
            return Ok(AttemptEnd::Finished);
        }
    }

    match remaining {
        Some(expected) if received < expected => {
            Err(DownloadError::short_body(&job.url, expected, received))
        }
        _ => Ok(AttemptEnd::Finished),
    }
}

async fn checkpoint(job: &SegmentJob) {
    let Some(checkpointer) = &job.checkpointer else {
        return;
    };
    if let Some(parts) = job.progress.claim_checkpoint(CHECKPOINT_INTERVAL) {
        checkpointer.save(parts).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_unless_cancelled_completes() {
        let flag = AtomicBool::new(false);
        assert!(sleep_unless_cancelled(Duration::from_millis(10), &flag).await);
    }

    #[tokio::test]
    async fn test_sleep_unless_cancelled_returns_early() {
        let flag = AtomicBool::new(true);
        let started = std::time::Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(30), &flag).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_open_part_truncates_to_offset() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("part_0");
        std::fs::write(&path, b"0123456789").unwrap();

        let file = open_part(&path, 4).await.unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"0123");
    }

    #[tokio::test]
    async fn test_open_part_creates_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("part_3");
        drop(open_part(&path, 0).await.unwrap());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
