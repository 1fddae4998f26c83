//! Constants for the download module (timeouts, intervals, budgets).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout for segment requests (30 seconds without progress).
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Timeout for the capability probe request (10 seconds).
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// Default number of segments for a fresh transfer.
pub const DEFAULT_WORKERS: usize = 8;

/// Upper bound on the worker count a caller may request.
pub const MAX_WORKERS: usize = 64;

/// Default whole-transfer attempt budget.
pub const DEFAULT_TRANSFER_RETRIES: u32 = 3;

/// Default pause between whole-transfer attempts.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// Default time the supervisor waits for workers after a pause request.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Supervisor liveness polling interval; also bounds progress events to 10 Hz.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between resume checkpoints while workers are running.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// How often the supervisor logs aggregate progress.
pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts made to replace the resume record before giving up.
pub const PERSIST_ATTEMPTS: u32 = 3;

/// Pause between resume record replacement attempts.
pub const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Granularity of cancellation checks while sleeping.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
