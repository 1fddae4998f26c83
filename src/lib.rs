//! segfetch Core Library
//!
//! Segmented, resumable HTTP downloads: probe a resource, split it into byte
//! ranges, fetch them in parallel with bounded retries, checkpoint progress so
//! an interrupted transfer resumes where it stopped, and merge the verified
//! parts into one output file.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - probing, planning, segment workers, supervisor, merge
//! - [`transfer`] - the `Transfer` capability (direct and resolver-backed)
//! - [`history`] - completed/incomplete download history

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod history;
pub mod transfer;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, EngineError, FailureType, HttpClient, ProgressEvent,
    RetryDecision, RetryPolicy, TransferConfig, TransferEngine, TransferError, TransferOutcome,
    TransferRequest, TransferState, TransferStatus, classify_error,
};
pub use transfer::{ResolvedStream, ResolvedTransfer, SegmentedTransfer, StreamResolver, Transfer};
