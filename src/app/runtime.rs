//! Command handlers: `get`, `list`, `resume`, `clear`.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use segfetch_core::download::{
    ResumeRecord, ResumeStore, TransferConfig, TransferOutcome, TransferRequest, TransferStatus,
};
use segfetch_core::history::HistoryStore;
use segfetch_core::transfer::{SegmentedTransfer, Transfer};
use tracing::{debug, info, warn};

use super::config_runtime::{build_transfer_config, resolve_output_dir, resolve_workers};
use super::exit_handler::determine_exit_outcome;
use super::progress_manager::spawn_progress_ui;
use super::terminal;
use crate::ProcessExit;
use crate::app_config::FileConfig;
use crate::cli::{Args, ClearArgs, Command, DirArgs, GetArgs, ResumeArgs};

pub(crate) async fn run_command(args: Args, file_config: FileConfig) -> Result<ProcessExit> {
    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    match args.command {
        Command::Get(get) => run_get(get, &file_config, use_bar).await,
        Command::List(list) => run_list(&list, &file_config).await,
        Command::Resume(resume) => run_resume(resume, &file_config, use_bar).await,
        Command::Clear(clear) => run_clear(&clear, &file_config).await,
    }
}

async fn run_get(get: GetArgs, file_config: &FileConfig, use_bar: bool) -> Result<ProcessExit> {
    if get.output.is_some() && get.urls.len() > 1 {
        bail!("--output names a single file; pass one URL or use --output-dir");
    }
    let output_dir = resolve_output_dir(get.output_dir.as_deref(), file_config);
    let workers = resolve_workers(get.workers, file_config);
    let config = build_transfer_config(&get.transfer, file_config);

    let requests: Vec<TransferRequest> = get
        .urls
        .iter()
        .map(|url| {
            let request = match &get.output {
                Some(file) => TransferRequest::to_file(url.clone(), file),
                None => TransferRequest::new(url.clone(), output_dir.clone()),
            };
            request.with_workers(workers)
        })
        .collect();

    run_all(requests, &config, use_bar).await
}

async fn run_resume(
    resume: ResumeArgs,
    file_config: &FileConfig,
    use_bar: bool,
) -> Result<ProcessExit> {
    let output_dir = resolve_output_dir(resume.output_dir.as_deref(), file_config);
    let config = build_transfer_config(&resume.transfer, file_config);
    let records = ResumeStore::scan(&output_dir).await;
    if records.is_empty() {
        info!(dir = %output_dir.display(), "nothing to resume");
        return Ok(ProcessExit::Success);
    }

    let requests = records
        .into_iter()
        .map(|record| {
            TransferRequest::new(record.url, output_dir.clone())
                .with_filename(&record.filename)
                .with_workers(record.original_worker_count)
        })
        .collect();
    run_all(requests, &config, use_bar).await
}

async fn run_all(
    requests: Vec<TransferRequest>,
    config: &TransferConfig,
    use_bar: bool,
) -> Result<ProcessExit> {
    // Shared by every transfer in the batch; set at most once.
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, pausing");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let result = run_batch(requests, config, use_bar, &shutdown).await;
    listener.abort();
    result
}

async fn run_batch(
    requests: Vec<TransferRequest>,
    config: &TransferConfig,
    use_bar: bool,
    shutdown: &Arc<AtomicBool>,
) -> Result<ProcessExit> {
    let total = requests.len();
    let mut completed = 0usize;

    for request in requests {
        if shutdown.load(Ordering::SeqCst) {
            info!(url = %request.url(), "interrupted; skipping remaining transfers");
            break;
        }
        let outcome = run_transfer(request.clone(), config.clone(), use_bar, shutdown).await?;
        report(&request, &outcome);

        let history = HistoryStore::new(request.output_dir());
        if let Err(e) = history.record(request.url(), &outcome).await {
            warn!(error = %e, "could not update download history");
        }

        if outcome.is_success() {
            completed += 1;
        }
        if outcome.status == TransferStatus::Paused {
            info!("interrupted; run `segfetch resume` to continue");
            break;
        }
    }

    Ok(determine_exit_outcome(completed, total - completed))
}

async fn run_transfer(
    request: TransferRequest,
    config: TransferConfig,
    use_bar: bool,
    shutdown: &Arc<AtomicBool>,
) -> Result<TransferOutcome> {
    let transfer: Arc<dyn Transfer> = Arc::new(
        SegmentedTransfer::new(request, config)
            .context("invalid transfer settings")?
            .with_shutdown(Arc::clone(shutdown)),
    );

    let progress = spawn_progress_ui(use_bar, transfer.subscribe());
    let outcome = transfer.start().await;

    if let Some(handle) = progress {
        let _ = handle.await;
    }
    Ok(outcome)
}

fn report(request: &TransferRequest, outcome: &TransferOutcome) {
    match outcome.status {
        TransferStatus::Completed => {
            println!("{}  {} bytes", outcome.path.display(), outcome.bytes_downloaded);
        }
        TransferStatus::Paused => {
            eprintln!(
                "paused {} at {} bytes",
                request.filename(),
                outcome.bytes_downloaded
            );
        }
        TransferStatus::Failed => {
            let reason = outcome
                .error
                .as_ref()
                .map_or_else(|| "unknown error".to_string(), ToString::to_string);
            eprintln!("failed {}: {reason}", request.url());
        }
    }
}

async fn run_list(list: &DirArgs, file_config: &FileConfig) -> Result<ProcessExit> {
    let output_dir = resolve_output_dir(list.output_dir.as_deref(), file_config);
    let records = ResumeStore::scan(&output_dir).await;
    debug!(dir = %output_dir.display(), count = records.len(), "scanned resume records");

    if records.is_empty() {
        println!("no resumable transfers in {}", output_dir.display());
    }
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(ProcessExit::Success)
}

#[allow(clippy::cast_precision_loss)]
fn format_record(record: &ResumeRecord) -> String {
    let downloaded = record.downloaded();
    let percent = if record.file_size == 0 {
        100.0
    } else {
        downloaded as f64 / record.file_size as f64 * 100.0
    };
    format!(
        "{}  {}/{} bytes ({percent:.1}%)  {} segments  {}",
        record.filename, downloaded, record.file_size, record.original_worker_count, record.url
    )
}

async fn run_clear(clear: &ClearArgs, file_config: &FileConfig) -> Result<ProcessExit> {
    let output_dir = resolve_output_dir(clear.output_dir.as_deref(), file_config);
    for store in stores_to_clear(clear, &output_dir).await {
        store.clear().await.with_context(|| {
            format!(
                "failed to clear resume state {}",
                store.record_path().display()
            )
        })?;
        println!("cleared resume state {}", store.record_path().display());
    }
    Ok(ProcessExit::Success)
}

/// Resume stores belonging to the URL being cleared.
///
/// Without `--output`, records in the directory are matched by URL so state
/// saved under a custom filename is found too.
async fn stores_to_clear(clear: &ClearArgs, output_dir: &Path) -> Vec<ResumeStore> {
    if let Some(file) = &clear.output {
        return vec![ResumeStore::new(&TransferRequest::to_file(
            clear.url.clone(),
            file,
        ))];
    }

    let matching: Vec<ResumeStore> = ResumeStore::scan(output_dir)
        .await
        .into_iter()
        .filter(|record| record.url == clear.url)
        .map(|record| ResumeStore::at(output_dir, &record.filename))
        .collect();
    if matching.is_empty() {
        debug!(url = %clear.url, "no matching record, clearing by derived filename");
        vec![ResumeStore::new(&TransferRequest::new(
            clear.url.clone(),
            output_dir,
        ))]
    } else {
        matching
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    fn clear_args(url: &str, output: Option<&Path>) -> ClearArgs {
        ClearArgs {
            url: url.to_string(),
            output_dir: None,
            output: output.map(Path::to_path_buf),
        }
    }

    #[tokio::test]
    async fn test_stores_to_clear_finds_custom_filename_by_url() {
        let dir = TempDir::new().unwrap();
        let url = "https://example.com/a.bin";
        let store = ResumeStore::at(dir.path(), "renamed.bin");
        let record = ResumeRecord::new(url, "renamed.bin", 10, BTreeMap::from([(0, 4)]), 1);
        store.save(&record).await.unwrap();

        let stores = stores_to_clear(&clear_args(url, None), dir.path()).await;

        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].record_path(), store.record_path());
    }

    #[tokio::test]
    async fn test_stores_to_clear_uses_output_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("custom.iso");

        let stores =
            stores_to_clear(&clear_args("https://example.com/a.bin", Some(&file)), dir.path())
                .await;

        assert_eq!(
            stores[0].record_path(),
            dir.path().join("custom.iso.resume").as_path()
        );
    }

    #[tokio::test]
    async fn test_stores_to_clear_falls_back_to_derived_filename() {
        let dir = TempDir::new().unwrap();
        let stores =
            stores_to_clear(&clear_args("https://example.com/a.bin", None), dir.path()).await;
        assert_eq!(
            stores[0].record_path(),
            dir.path().join("a.bin.resume").as_path()
        );
    }

    #[tokio::test]
    async fn test_batch_stops_when_interrupted_before_start() {
        let dir = TempDir::new().unwrap();
        let requests = vec![
            TransferRequest::new("http://127.0.0.1:9/one.bin", dir.path()),
            TransferRequest::new("http://127.0.0.1:9/two.bin", dir.path()),
        ];
        let shutdown = Arc::new(AtomicBool::new(true));

        let exit = run_batch(requests, &TransferConfig::default(), false, &shutdown)
            .await
            .unwrap();

        assert_eq!(exit, ProcessExit::Failure);
        assert!(
            !HistoryStore::new(dir.path()).path().exists(),
            "no transfer should have run"
        );
    }

    #[test]
    fn test_format_record_shows_progress() {
        let record = ResumeRecord {
            url: "https://example.com/a.bin".to_string(),
            filename: "a.bin".to_string(),
            file_size: 200,
            parts: BTreeMap::from([(0, 50), (1, 0)]),
            timestamp: 0,
            original_worker_count: 2,
        };
        let line = format_record(&record);
        assert!(line.contains("a.bin"));
        assert!(line.contains("50/200"));
        assert!(line.contains("25.0%"));
        assert!(line.contains("2 segments"));
    }
}
