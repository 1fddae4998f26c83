//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Segmented, resumable HTTP downloads.
///
/// Splits a download into byte ranges fetched in parallel, checkpoints
/// progress so an interrupted transfer picks up where it stopped, and merges
/// the verified parts into the final file.
#[derive(Parser, Debug)]
#[command(name = "segfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one or more URLs
    Get(GetArgs),

    /// List resumable transfers in a directory
    List(DirArgs),

    /// Resume every resumable transfer in a directory
    Resume(ResumeArgs),

    /// Discard the resume state of a URL
    Clear(ClearArgs),
}

/// Tunables shared by commands that run transfers.
#[derive(ClapArgs, Debug, Clone)]
pub struct TransferArgs {
    /// Attempts per segment before it counts as failed (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub segment_retries: Option<u32>,

    /// Whole-transfer attempts (1-10)
    #[arg(short = 'R', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub transfer_retries: Option<u32>,

    /// Seconds to wait between whole-transfer attempts (0-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=3600))]
    pub retry_cooldown: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct GetArgs {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Output directory
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Explicit output file (single URL only)
    #[arg(long, conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Parallel segments for new transfers (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub workers: Option<u16>,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

#[derive(ClapArgs, Debug)]
pub struct DirArgs {
    /// Directory holding resume records
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
pub struct ResumeArgs {
    /// Directory holding resume records
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    #[command(flatten)]
    pub transfer: TransferArgs,
}

#[derive(ClapArgs, Debug)]
pub struct ClearArgs {
    /// URL whose resume state should be discarded
    pub url: String,

    /// Directory holding resume records
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Output file the transfer was started with (`get --output`)
    #[arg(long, conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,
}
