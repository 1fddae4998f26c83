//! CLI entry point for segfetch.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod app_config;
mod cli;

use app::runtime::run_command;
use app::terminal;
use cli::Args;

/// Process exit outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every transfer completed.
    Success,
    /// Some transfers completed, others paused or failed.
    Partial,
    /// No transfer completed.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(outcome: ProcessExit) -> Self {
        match outcome {
            ProcessExit::Success => Self::SUCCESS,
            ProcessExit::Partial => Self::from(2),
            ProcessExit::Failure => Self::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_default_file_config()?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > default (info)
    let default_level = terminal::default_log_level(args.verbose, args.quiet, file_config.verbosity);
    terminal::init_tracing(default_level);

    debug!(?args, ?file_config, "CLI arguments parsed");

    let outcome = run_command(args, file_config).await?;
    Ok(outcome.into())
}
