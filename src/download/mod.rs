//! Segmented, resumable HTTP downloads.
//!
//! A transfer is probed, split into byte-range segments, downloaded by one
//! worker per segment, checkpointed to a resume record, and merged into the
//! destination once every segment is verified.
//!
//! # Features
//!
//! - Parallel ranged requests with a single-stream fallback
//! - Crash-consistent resume records (atomic replace)
//! - Two retry budgets: per segment and per whole transfer
//! - Strictly validated, all-or-nothing merge
//! - Progress events on a watch channel
//!
//! # Example
//!
//! ```no_run
//! use segfetch_core::download::{TransferConfig, TransferEngine, TransferRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = TransferRequest::new("https://example.com/big.iso", "./downloads");
//! let engine = TransferEngine::new(request, TransferConfig::default())?;
//! let outcome = engine.run().await;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod engine;
mod error;
mod filename;
mod merger;
mod planner;
mod probe;
mod progress;
mod request;
mod resume;
mod retry;
mod worker;

pub use client::{DEFAULT_USER_AGENT, HttpClient};
pub use engine::{EngineError, TransferConfig, TransferEngine, TransferOutcome, TransferStatus};
pub use error::{DownloadError, TransferError};
pub use filename::{FALLBACK_FILENAME, derive_filename};
pub use merger::merge_segments;
pub use planner::{Segment, TransferPlan, effective_worker_count, plan_segments};
pub use probe::{ProbeResult, probe};
pub use progress::{ProgressEvent, SharedProgress, SpeedMeter, TransferState};
pub use request::TransferRequest;
pub use resume::{Checkpointer, RESUME_EXTENSION, ResumeRecord, ResumeStore};
pub(crate) use resume::unix_now;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after, retry_after_delay,
};
pub use worker::{SegmentJob, SegmentOutcome, run_segment};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` / `Result<T, TransferError>` explicitly.
