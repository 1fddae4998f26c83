//! Transfer supervisor: runs one segmented transfer from probe to merge.
//!
//! # Overview
//!
//! ```text
//! Planning ──► Running ──► Merging ──► Completed
//!                │  ▲
//!                │  └── Retrying (cooldown, fresh client)
//!                ├──► Paused   (resume state persisted)
//!                └──► Failed   (budget exhausted, resume state kept)
//! ```
//!
//! Each whole-transfer attempt spawns one task per unfinished segment and
//! polls them every [`POLL_INTERVAL`], publishing a [`ProgressEvent`] on a
//! watch channel. Segment failures are retried locally by the workers; the
//! supervisor only sees the error count once every worker has exited.
//!
//! # Example
//!
//! ```no_run
//! use segfetch_core::download::{TransferConfig, TransferEngine, TransferRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = TransferRequest::new("https://example.com/big.iso", "./downloads").with_workers(8);
//! let engine = TransferEngine::new(request, TransferConfig::default())?;
//! let outcome = engine.run().await;
//! println!("{:?} -> {}", outcome.status, outcome.path.display());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_RETRY_COOLDOWN, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_TRANSFER_RETRIES, MAX_WORKERS, POLL_INTERVAL, PROGRESS_LOG_INTERVAL,
    READ_TIMEOUT_SECS,
};
use super::error::TransferError;
use super::merger::merge_segments;
use super::planner::TransferPlan;
use super::probe::{ProbeResult, probe};
use super::progress::{ProgressEvent, SharedProgress, SpeedMeter, TransferState};
use super::request::TransferRequest;
use super::resume::{Checkpointer, ResumeRecord, ResumeStore};
use super::retry::RetryPolicy;
use super::worker::{SegmentJob, SegmentOutcome, run_segment, sleep_unless_cancelled};
use super::HttpClient;

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Error type for invalid engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Requested worker count is out of range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkerCount {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Whole-transfer retry budget is zero.
    #[error("invalid transfer retry budget {value}: must be at least 1")]
    InvalidRetryBudget {
        /// The invalid value that was provided.
        value: u32,
    },
}

/// Tunables for a transfer. Builder-style.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    segment_retry: RetryPolicy,
    transfer_retries: u32,
    retry_cooldown: Duration,
    shutdown_grace: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            segment_retry: RetryPolicy::default(),
            transfer_retries: DEFAULT_TRANSFER_RETRIES,
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

impl TransferConfig {
    /// Sets the per-segment retry policy.
    #[must_use]
    pub fn with_segment_retry(mut self, policy: RetryPolicy) -> Self {
        self.segment_retry = policy;
        self
    }

    /// Sets the whole-transfer attempt budget.
    #[must_use]
    pub fn with_transfer_retries(mut self, attempts: u32) -> Self {
        self.transfer_retries = attempts;
        self
    }

    /// Sets the pause between whole-transfer attempts.
    #[must_use]
    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    /// Sets how long a pause waits for workers before aborting them.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the connect and per-read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Per-segment retry policy.
    #[must_use]
    pub fn segment_retry(&self) -> &RetryPolicy {
        &self.segment_retry
    }

    /// Whole-transfer attempt budget.
    #[must_use]
    pub fn transfer_retries(&self) -> u32 {
        self.transfer_retries
    }

    /// Pause between whole-transfer attempts.
    #[must_use]
    pub fn retry_cooldown(&self) -> Duration {
        self.retry_cooldown
    }

    /// Grace period after a pause request.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    fn client(&self) -> HttpClient {
        HttpClient::new_with_timeouts(self.connect_timeout, self.read_timeout)
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Destination written.
    Completed,
    /// Stopped on request; can be resumed.
    Paused,
    /// Ended without a destination file.
    Failed,
}

/// Result of [`TransferEngine::run`]. Failures are values, not `Err`.
#[derive(Debug)]
pub struct TransferOutcome {
    /// Final status.
    pub status: TransferStatus,
    /// Destination path (exists only when completed).
    pub path: PathBuf,
    /// Bytes on disk for this transfer when it ended.
    pub bytes_downloaded: u64,
    /// Why the transfer failed, if it did.
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    /// Whether the destination file was produced.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == TransferStatus::Completed
    }
}

/// Resets the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What the workers of one whole-transfer attempt left behind.
enum AttemptResult {
    Finished,
    Paused,
    Failed { failed_segments: usize },
}

/// Supervisor for one transfer request.
///
/// The shutdown flag and progress channel are explicit, shareable handles; no
/// global state is involved.
#[derive(Debug)]
pub struct TransferEngine {
    request: TransferRequest,
    config: TransferConfig,
    shutdown: Arc<AtomicBool>,
    running: AtomicBool,
    progress_tx: watch::Sender<ProgressEvent>,
}

impl TransferEngine {
    /// Creates an engine for `request`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidWorkerCount`] when the requested worker count is
    ///   outside `1..=MAX_WORKERS`.
    /// - [`EngineError::InvalidRetryBudget`] when `transfer_retries` is zero.
    #[instrument(level = "debug", skip(config), fields(url = %request.url()))]
    pub fn new(request: TransferRequest, config: TransferConfig) -> Result<Self, EngineError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&request.workers()) {
            return Err(EngineError::InvalidWorkerCount {
                value: request.workers(),
            });
        }
        if config.transfer_retries == 0 {
            return Err(EngineError::InvalidRetryBudget { value: 0 });
        }

        debug!(
            workers = request.workers(),
            segment_attempts = config.segment_retry.max_attempts(),
            transfer_retries = config.transfer_retries,
            "creating transfer engine"
        );

        let (progress_tx, _) = watch::channel(ProgressEvent::default());
        Ok(Self {
            request,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            progress_tx,
        })
    }

    /// Uses an externally owned shutdown flag.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Publishes progress on an externally owned channel.
    #[must_use]
    pub fn with_progress(mut self, progress_tx: watch::Sender<ProgressEvent>) -> Self {
        self.progress_tx = progress_tx;
        self
    }

    /// The request this engine serves.
    #[must_use]
    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// The cancellation flag shared with workers.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Requests a pause. Workers stop at their next chunk boundary.
    pub fn pause(&self) {
        info!(url = %self.request.url(), "pause requested");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Clears a previous pause request so the next run proceeds.
    pub fn clear_pause(&self) {
        self.shutdown.store(false, Ordering::SeqCst);
    }

    /// Subscribes to progress events.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress_tx.send_replace(event);
    }

    fn emit_state(&self, state: TransferState, downloaded: u64, total: Option<u64>) {
        self.emit(ProgressEvent::new(state, downloaded, total, 0.0));
    }

    fn outcome(&self, status: TransferStatus, bytes: u64, error: Option<TransferError>) -> TransferOutcome {
        TransferOutcome {
            status,
            path: self.request.destination(),
            bytes_downloaded: bytes,
            error,
        }
    }

    fn failed(&self, error: TransferError, bytes: u64, total: Option<u64>) -> TransferOutcome {
        error!(error = %error, "transfer failed");
        self.emit_state(TransferState::Failed, bytes, total);
        self.outcome(TransferStatus::Failed, bytes, Some(error))
    }

    /// Runs the transfer until it completes, pauses, or fails.
    ///
    /// Only one run per engine may be active; a concurrent call returns a
    /// failed outcome with [`TransferError::AlreadyRunning`].
    #[instrument(skip(self), fields(url = %self.request.url(), file = %self.request.filename()))]
    pub async fn run(&self) -> TransferOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("transfer already running");
            return self.outcome(
                TransferStatus::Failed,
                0,
                Some(TransferError::AlreadyRunning {
                    url: self.request.url().to_string(),
                }),
            );
        }
        let _guard = RunGuard(&self.running);
        self.supervise().await
    }

    async fn supervise(&self) -> TransferOutcome {
        let started = Instant::now();
        self.emit_state(TransferState::Planning, 0, None);

        let mut client = self.config.client();
        let probed = match probe(&client, self.request.url()).await {
            Ok(result) => ProbeResult {
                total_size: result.total_size.or(self.request.size_hint()),
                ..result
            },
            Err(e) => {
                return self.failed(TransferError::probe(self.request.url(), e), 0, None);
            }
        };

        let store = Arc::new(ResumeStore::new(&self.request));
        let (plan, initial_parts) = match self.prepare(probed, &store).await {
            Ok(prepared) => prepared,
            Err(e) => return self.failed(e, 0, probed.total_size),
        };
        let checkpointer = plan.total_size.filter(|_| plan.is_resumable()).map(|size| {
            Checkpointer::new(Arc::clone(&store), &self.request, size, plan.original_worker_count)
        });

        let progress = Arc::new(SharedProgress::new(&initial_parts));
        info!(
            segments = plan.segments.len(),
            total_size = ?plan.total_size,
            already_downloaded = progress.total_downloaded(),
            resumable = plan.is_resumable(),
            "transfer planned"
        );

        let budget = self.config.transfer_retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            progress.reset_errors();
            debug!(attempt, budget, "starting whole-transfer attempt");

            let result = self
                .run_attempt(&plan, &store, &progress, &client, checkpointer.as_ref())
                .await;

            match result {
                AttemptResult::Finished => break,
                AttemptResult::Paused => {
                    return self.paused(&plan, &progress, checkpointer.as_ref()).await;
                }
                AttemptResult::Failed { failed_segments } => {
                    if let Some(checkpointer) = &checkpointer {
                        checkpointer.save(progress.snapshot()).await;
                    }
                    if attempt >= budget {
                        let error = TransferError::RetryExhausted {
                            url: self.request.url().to_string(),
                            attempts: attempt,
                            failed_segments,
                        };
                        return self.failed(error, progress.total_downloaded(), plan.total_size);
                    }

                    warn!(
                        attempt,
                        budget,
                        failed_segments,
                        cooldown_secs = self.config.retry_cooldown.as_secs_f64(),
                        "segments failed, retrying whole transfer after cooldown"
                    );
                    self.emit_state(
                        TransferState::Retrying,
                        progress.total_downloaded(),
                        plan.total_size,
                    );
                    if !sleep_unless_cancelled(self.config.retry_cooldown, &self.shutdown).await {
                        return self.paused(&plan, &progress, checkpointer.as_ref()).await;
                    }
                    client = self.config.client();
                }
            }
        }

        self.emit_state(
            TransferState::Merging,
            progress.total_downloaded(),
            plan.total_size,
        );
        let destination = self.request.destination();
        match merge_segments(&plan, &store, &destination).await {
            Ok(bytes) => {
                log_statistics(bytes, started.elapsed());
                self.emit_state(TransferState::Completed, bytes, Some(bytes));
                self.outcome(TransferStatus::Completed, bytes, None)
            }
            Err(e) => self.failed(e, progress.total_downloaded(), plan.total_size),
        }
    }

    /// Builds the plan and the starting per-segment offsets.
    ///
    /// A valid resume record fixes the segment boundaries through its original
    /// worker count. Anything else starts from scratch with stale state cleared.
    async fn prepare(
        &self,
        probed: ProbeResult,
        store: &ResumeStore,
    ) -> Result<(TransferPlan, Vec<u64>), TransferError> {
        let fresh = TransferPlan::new(probed, self.request.workers());

        let plan_and_parts = if fresh.is_resumable() {
            match self.rehydrate(probed, store).await {
                Some(resumed) => resumed,
                None => {
                    clear_logged(store).await;
                    let parts = vec![0; fresh.segments.len()];
                    if let Some(size) = fresh.total_size {
                        let record = ResumeRecord::new(
                            self.request.url(),
                            self.request.filename(),
                            size,
                            parts.iter().copied().enumerate().collect(),
                            fresh.original_worker_count,
                        );
                        if let Err(e) = store.save(&record).await {
                            warn!(error = %e, "initial resume record not saved, continuing");
                        }
                    }
                    (fresh, parts)
                }
            }
        } else {
            if store.exists().await {
                info!("discarding resume state: transfer cannot be resumed by range");
            }
            clear_logged(store).await;
            (fresh, vec![0])
        };

        tokio::fs::create_dir_all(store.parts_dir())
            .await
            .map_err(|e| TransferError::io(store.parts_dir(), e))?;
        Ok(plan_and_parts)
    }

    async fn rehydrate(
        &self,
        probed: ProbeResult,
        store: &ResumeStore,
    ) -> Option<(TransferPlan, Vec<u64>)> {
        let record = store.load(&self.request).await?;
        if Some(record.file_size) != probed.total_size {
            warn!(
                recorded = record.file_size,
                probed = ?probed.total_size,
                "resource size changed, starting over"
            );
            return None;
        }

        let plan = TransferPlan::new(probed, record.original_worker_count);
        if plan.segments.len() != record.original_worker_count {
            warn!("resume record does not fit the resource, starting over");
            return None;
        }
        if record.original_worker_count != self.request.workers() {
            info!(
                requested = self.request.workers(),
                original = record.original_worker_count,
                "resuming with the original worker count"
            );
        }

        let mut parts = Vec::with_capacity(plan.segments.len());
        for segment in &plan.segments {
            let recorded = record
                .parts
                .get(&segment.index)
                .copied()
                .unwrap_or(0)
                .min(segment.len.unwrap_or(0));
            let path = store.segment_path(segment.index);
            let on_disk = match tokio::fs::metadata(&path).await {
                Ok(metadata) => Some(metadata.len()),
                Err(_) => None,
            };
            let offset = match on_disk {
                None if recorded > 0 => {
                    warn!(segment = segment.index, recorded, "segment file missing, restarting segment");
                    0
                }
                None => 0,
                Some(len) if len < recorded => {
                    warn!(segment = segment.index, recorded, on_disk = len, "segment file shorter than recorded");
                    len
                }
                Some(_) => recorded,
            };
            parts.push(offset);
        }
        Some((plan, parts))
    }

    async fn run_attempt(
        &self,
        plan: &TransferPlan,
        store: &ResumeStore,
        progress: &Arc<SharedProgress>,
        client: &HttpClient,
        checkpointer: Option<&Checkpointer>,
    ) -> AttemptResult {
        let mut tasks = JoinSet::new();
        for segment in &plan.segments {
            if progress.is_finished(segment.index) {
                continue;
            }
            tasks.spawn(run_segment(SegmentJob {
                client: client.clone(),
                url: self.request.url().to_string(),
                segment: *segment,
                ranged: plan.accepts_ranges,
                path: store.segment_path(segment.index),
                progress: Arc::clone(progress),
                checkpointer: checkpointer.cloned(),
                policy: self.config.segment_retry.clone(),
                shutdown: Arc::clone(&self.shutdown),
            }));
        }

        let mut meter = SpeedMeter::new(progress.total_downloaded());
        let mut last_log = Instant::now();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        while !tasks.is_empty() {
            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => debug!(?outcome, remaining = tasks.len(), "segment worker exited"),
                        Some(Err(e)) => {
                            error!(error = %e, "segment worker panicked");
                            progress.record_error();
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let downloaded = progress.total_downloaded();
                    let speed = meter.sample(downloaded);
                    self.emit(ProgressEvent::new(TransferState::Running, downloaded, plan.total_size, speed));
                    if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                        debug!(
                            downloaded,
                            total = ?plan.total_size,
                            speed_bps = speed,
                            active_workers = tasks.len(),
                            "progress"
                        );
                        last_log = Instant::now();
                    }
                    if self.shutdown.load(Ordering::SeqCst) {
                        self.drain_after_pause(&mut tasks).await;
                        break;
                    }
                }
            }
        }

        let failed_segments = progress.error_count();
        if failed_segments == 0 && progress.all_finished() {
            AttemptResult::Finished
        } else if self.shutdown.load(Ordering::SeqCst) {
            AttemptResult::Paused
        } else {
            AttemptResult::Failed {
                failed_segments: failed_segments.max(1),
            }
        }
    }

    /// Waits up to the grace period for workers, then aborts the rest.
    async fn drain_after_pause(&self, tasks: &mut JoinSet<SegmentOutcome>) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(_) => {
                    warn!(remaining = tasks.len(), "workers did not stop in time, aborting");
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return;
                }
            }
        }
    }

    async fn paused(
        &self,
        plan: &TransferPlan,
        progress: &SharedProgress,
        checkpointer: Option<&Checkpointer>,
    ) -> TransferOutcome {
        let downloaded = progress.total_downloaded();
        if let Some(checkpointer) = checkpointer {
            checkpointer.save(progress.snapshot()).await;
        }
        info!(downloaded, total = ?plan.total_size, "transfer paused");
        self.emit_state(TransferState::Paused, downloaded, plan.total_size);
        self.outcome(TransferStatus::Paused, downloaded, None)
    }
}

async fn clear_logged(store: &ResumeStore) {
    if let Err(e) = store.clear().await {
        warn!(error = %e, "failed to clear stale resume state");
    }
}

#[allow(clippy::cast_precision_loss)]
fn log_statistics(bytes: u64, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    let average_bps = if seconds > 0.0 { bytes as f64 / seconds } else { 0.0 };
    info!(
        bytes,
        elapsed_secs = seconds,
        average_bps,
        "transfer completed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest::new("https://example.com/a.bin", "/tmp")
    }

    #[test]
    fn test_engine_new_valid_worker_counts() {
        for workers in [1, 8, MAX_WORKERS] {
            let engine =
                TransferEngine::new(request().with_workers(workers), TransferConfig::default())
                    .unwrap();
            assert_eq!(engine.request().workers(), workers);
        }
    }

    #[test]
    fn test_engine_new_rejects_zero_workers() {
        let result = TransferEngine::new(request().with_workers(0), TransferConfig::default());
        assert!(matches!(
            result,
            Err(EngineError::InvalidWorkerCount { value: 0 })
        ));
    }

    #[test]
    fn test_engine_new_rejects_too_many_workers() {
        let result = TransferEngine::new(
            request().with_workers(MAX_WORKERS + 1),
            TransferConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::InvalidWorkerCount { .. })));
    }

    #[test]
    fn test_engine_new_rejects_zero_retry_budget() {
        let result = TransferEngine::new(
            request(),
            TransferConfig::default().with_transfer_retries(0),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidRetryBudget { value: 0 })
        ));
    }

    #[test]
    fn test_config_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.transfer_retries(), 3);
        assert_eq!(config.retry_cooldown(), Duration::from_secs(30));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.segment_retry().max_attempts(), 3);
    }

    #[test]
    fn test_pause_sets_shared_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let engine = TransferEngine::new(request(), TransferConfig::default())
            .unwrap()
            .with_shutdown(Arc::clone(&flag));
        engine.pause();
        assert!(flag.load(Ordering::SeqCst));
        engine.clear_pause();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidWorkerCount { value: 0 }.to_string();
        assert!(msg.contains("invalid worker count"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_outcome_success_flag() {
        let outcome = TransferOutcome {
            status: TransferStatus::Paused,
            path: PathBuf::from("/tmp/a.bin"),
            bytes_downloaded: 1,
            error: None,
        };
        assert!(!outcome.is_success());
    }
}
