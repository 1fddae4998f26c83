//! Shared progress counters and the progress events published to observers.
//!
//! Workers and the supervisor share one [`SharedProgress`] behind an `Arc`.
//! All counters live behind a single `std::sync::Mutex` so the total always
//! equals the sum of the per-segment counters. The lock is never held across
//! an `.await`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Where a transfer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Probing the server and planning segments.
    #[default]
    Planning,
    /// Segment workers are running.
    Running,
    /// Stopped on request; resume state persisted.
    Paused,
    /// Waiting out the cooldown before another whole-transfer attempt.
    Retrying,
    /// Concatenating segment files into the destination.
    Merging,
    /// Destination written and resume state cleared.
    Completed,
    /// Ended without a destination file.
    Failed,
}

impl TransferState {
    /// Whether no further progress events will follow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paused | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Retrying => "retrying",
            Self::Merging => "merging",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot published on the progress channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    /// Lifecycle state.
    pub state: TransferState,
    /// Percentage complete, when the total is known.
    pub percent: Option<f64>,
    /// Smoothed transfer rate in bytes per second.
    pub speed_bps: f64,
    /// Bytes downloaded so far, across all segments.
    pub bytes_downloaded: u64,
    /// Total size, when known.
    pub bytes_total: Option<u64>,
    /// Estimated time remaining, when both total and speed are known.
    pub eta: Option<Duration>,
}

impl ProgressEvent {
    /// Builds an event, deriving percentage and ETA.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(
        state: TransferState,
        bytes_downloaded: u64,
        bytes_total: Option<u64>,
        speed_bps: f64,
    ) -> Self {
        let percent = bytes_total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (bytes_downloaded as f64 / total as f64 * 100.0).min(100.0)
            }
        });
        let eta = bytes_total
            .filter(|_| speed_bps >= MIN_SPEED_BPS)
            .and_then(|total| {
                let remaining = total.saturating_sub(bytes_downloaded) as f64;
                Duration::try_from_secs_f64(remaining / speed_bps).ok()
            });
        Self {
            state,
            percent,
            speed_bps,
            bytes_downloaded,
            bytes_total,
            eta,
        }
    }
}

#[derive(Debug)]
struct ProgressState {
    total: u64,
    parts: Vec<u64>,
    finished: Vec<bool>,
    errors: usize,
    last_checkpoint: Instant,
}

/// Counters shared by the supervisor and every segment worker.
#[derive(Debug)]
pub struct SharedProgress {
    inner: Mutex<ProgressState>,
}

impl SharedProgress {
    /// Creates counters seeded with already-downloaded bytes per segment.
    #[must_use]
    pub fn new(initial_parts: &[u64]) -> Self {
        Self {
            inner: Mutex::new(ProgressState {
                total: initial_parts.iter().sum(),
                parts: initial_parts.to_vec(),
                finished: vec![false; initial_parts.len()],
                errors: 0,
                last_checkpoint: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // Counters stay consistent under every critical section, so a
        // poisoned lock still holds usable data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `bytes` to segment `index` and to the total.
    pub fn add(&self, index: usize, bytes: u64) {
        let mut state = self.lock();
        if let Some(part) = state.parts.get_mut(index) {
            *part += bytes;
            state.total += bytes;
        }
    }

    /// Sets segment `index` to `downloaded` bytes, adjusting the total.
    pub fn reset_segment(&self, index: usize, downloaded: u64) {
        let mut state = self.lock();
        if let Some(part) = state.parts.get_mut(index) {
            let previous = std::mem::replace(part, downloaded);
            state.total = state.total - previous + downloaded;
        }
    }

    /// Bytes downloaded for segment `index`.
    #[must_use]
    pub fn segment_downloaded(&self, index: usize) -> u64 {
        self.lock().parts.get(index).copied().unwrap_or(0)
    }

    /// Bytes downloaded across all segments.
    #[must_use]
    pub fn total_downloaded(&self) -> u64 {
        self.lock().total
    }

    /// Marks segment `index` as fully downloaded.
    pub fn mark_finished(&self, index: usize) {
        if let Some(flag) = self.lock().finished.get_mut(index) {
            *flag = true;
        }
    }

    /// Whether segment `index` has finished.
    #[must_use]
    pub fn is_finished(&self, index: usize) -> bool {
        self.lock().finished.get(index).copied().unwrap_or(false)
    }

    /// Whether every segment has finished.
    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.lock().finished.iter().all(|flag| *flag)
    }

    /// Records a segment that exhausted its local retries.
    pub fn record_error(&self) {
        self.lock().errors += 1;
    }

    /// Segments that failed during the current attempt.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.lock().errors
    }

    /// Clears the error count before a new whole-transfer attempt.
    pub fn reset_errors(&self) {
        self.lock().errors = 0;
    }

    /// Per-segment byte counts keyed by index.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<usize, u64> {
        self.lock().parts.iter().copied().enumerate().collect()
    }

    /// Claims the next checkpoint if `interval` has passed since the last one.
    ///
    /// Returns the counters to persist. Only one caller wins per interval.
    #[must_use]
    pub fn claim_checkpoint(&self, interval: Duration) -> Option<BTreeMap<usize, u64>> {
        let mut state = self.lock();
        if state.last_checkpoint.elapsed() < interval {
            return None;
        }
        state.last_checkpoint = Instant::now();
        Some(state.parts.iter().copied().enumerate().collect())
    }
}

/// Weight of the newest sample in the smoothed rate.
const SPEED_SMOOTHING: f64 = 0.3;

/// Rates below one byte per second count as stalled.
const MIN_SPEED_BPS: f64 = 1.0;

/// Exponentially smoothed transfer rate.
#[derive(Debug)]
pub struct SpeedMeter {
    last_bytes: u64,
    last_sample: Instant,
    speed_bps: f64,
}

impl SpeedMeter {
    /// Starts measuring from `bytes` already downloaded.
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        Self {
            last_bytes: bytes,
            last_sample: Instant::now(),
            speed_bps: 0.0,
        }
    }

    /// Feeds the current byte count and returns the smoothed rate.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample(&mut self, bytes: u64) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_sample).as_secs_f64();
        if elapsed <= 0.0 {
            return self.speed_bps;
        }
        let instant = bytes.saturating_sub(self.last_bytes) as f64 / elapsed;
        let smoothed = if self.speed_bps == 0.0 {
            instant
        } else {
            self.speed_bps * (1.0 - SPEED_SMOOTHING) + instant * SPEED_SMOOTHING
        };
        // A stalled transfer decays geometrically; snap it to a real zero.
        self.speed_bps = if smoothed < MIN_SPEED_BPS { 0.0 } else { smoothed };
        self.last_bytes = bytes;
        self.last_sample = now;
        self.speed_bps
    }

    /// Last smoothed rate.
    #[must_use]
    pub fn speed(&self) -> f64 {
        self.speed_bps
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_total_tracks_sum_of_parts() {
        let progress = SharedProgress::new(&[10, 0, 5]);
        assert_eq!(progress.total_downloaded(), 15);

        progress.add(1, 7);
        progress.reset_segment(0, 3);
        assert_eq!(progress.segment_downloaded(0), 3);
        assert_eq!(progress.segment_downloaded(1), 7);
        assert_eq!(progress.total_downloaded(), 15);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let progress = SharedProgress::new(&[0]);
        progress.add(5, 100);
        progress.mark_finished(5);
        assert_eq!(progress.total_downloaded(), 0);
        assert!(!progress.is_finished(5));
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let progress = Arc::new(SharedProgress::new(&[0; 4]));
        let handles: Vec<_> = (0..4)
            .map(|index| {
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        progress.add(index, 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(progress.total_downloaded(), 4000);
        assert_eq!(progress.snapshot().values().sum::<u64>(), 4000);
    }

    #[test]
    fn test_finished_flags_and_errors() {
        let progress = SharedProgress::new(&[0, 0]);
        progress.mark_finished(0);
        assert!(!progress.all_finished());
        progress.mark_finished(1);
        assert!(progress.all_finished());

        progress.record_error();
        progress.record_error();
        assert_eq!(progress.error_count(), 2);
        progress.reset_errors();
        assert_eq!(progress.error_count(), 0);
    }

    #[test]
    fn test_checkpoint_claimed_once_per_interval() {
        let progress = SharedProgress::new(&[1, 2]);
        let claimed = progress.claim_checkpoint(Duration::ZERO).unwrap();
        assert_eq!(claimed.get(&1), Some(&2));
        assert!(progress.claim_checkpoint(Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_event_percent_and_eta() {
        let event = ProgressEvent::new(TransferState::Running, 250, Some(1000), 50.0);
        assert_eq!(event.percent, Some(25.0));
        assert_eq!(event.eta, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_event_unknown_total_has_no_percent() {
        let event = ProgressEvent::new(TransferState::Running, 250, None, 50.0);
        assert_eq!(event.percent, None);
        assert_eq!(event.eta, None);
    }

    #[test]
    fn test_event_zero_total_is_complete() {
        let event = ProgressEvent::new(TransferState::Completed, 0, Some(0), 0.0);
        assert_eq!(event.percent, Some(100.0));
    }

    #[test]
    fn test_speed_meter_starts_at_zero() {
        let meter = SpeedMeter::new(100);
        assert!(meter.speed().abs() < f64::EPSILON);
    }

    #[test]
    fn test_event_stalled_speed_has_no_eta() {
        for speed in [1.861_746_988_122_481_7e-10, f64::MIN_POSITIVE, 0.5] {
            let event =
                ProgressEvent::new(TransferState::Running, 1_000_000, Some(4_000_000_000), speed);
            assert_eq!(event.eta, None, "speed {speed}");
        }
        let slow = ProgressEvent::new(TransferState::Running, 0, Some(4_000_000_000), 1.0);
        assert!(slow.eta.is_some());
    }

    #[test]
    fn test_speed_meter_decays_to_zero_when_stalled() {
        let mut meter = SpeedMeter {
            last_bytes: 1_000_000,
            last_sample: Instant::now()
                .checked_sub(Duration::from_millis(100))
                .unwrap(),
            speed_bps: 1.2,
        };
        assert_eq!(meter.sample(1_000_000), 0.0);
        assert_eq!(meter.speed(), 0.0);
    }

    #[test]
    fn test_state_terminal_and_display() {
        assert!(TransferState::Paused.is_terminal());
        assert!(!TransferState::Retrying.is_terminal());
        assert_eq!(TransferState::Merging.to_string(), "merging");
    }
}
