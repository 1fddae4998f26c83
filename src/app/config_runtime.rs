//! Merges CLI flags over file config over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use segfetch_core::download::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_WORKERS, READ_TIMEOUT_SECS};
use segfetch_core::download::{RetryPolicy, TransferConfig};

use crate::app_config::FileConfig;
use crate::cli::TransferArgs;

/// Output directory used when neither the CLI nor the config names one.
const DEFAULT_OUTPUT_DIR: &str = ".";

pub(crate) fn resolve_output_dir(cli: Option<&Path>, file_config: &FileConfig) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

pub(crate) fn resolve_workers(cli: Option<u16>, file_config: &FileConfig) -> usize {
    cli.map(usize::from)
        .or(file_config.workers)
        .unwrap_or(DEFAULT_WORKERS)
}

pub(crate) fn build_transfer_config(args: &TransferArgs, file_config: &FileConfig) -> TransferConfig {
    let mut config = TransferConfig::default();

    if let Some(attempts) = args.segment_retries.or(file_config.segment_retries) {
        config = config.with_segment_retry(RetryPolicy::with_max_attempts(attempts));
    }
    if let Some(attempts) = args.transfer_retries.or(file_config.transfer_retries) {
        config = config.with_transfer_retries(attempts);
    }
    if let Some(secs) = args.retry_cooldown.or(file_config.retry_cooldown_secs) {
        config = config.with_retry_cooldown(Duration::from_secs(secs));
    }

    let connect = file_config
        .connect_timeout_secs
        .unwrap_or(CONNECT_TIMEOUT_SECS);
    let read = file_config.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS);
    config.with_timeouts(Duration::from_secs(connect), Duration::from_secs(read))
}
