//! The `Transfer` capability and its two variants.
//!
//! - [`SegmentedTransfer`] downloads a direct resource URL.
//! - [`ResolvedTransfer`] first asks a [`StreamResolver`] to turn a page URL
//!   into a direct stream URL, then delegates to a [`SegmentedTransfer`].
//!
//! Both are driven through `dyn Transfer`, so callers treat them alike.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::download::{
    EngineError, ProgressEvent, TransferConfig, TransferEngine, TransferError, TransferOutcome,
    TransferRequest, TransferState, TransferStatus,
};

/// A controllable, observable transfer.
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Runs the transfer until it completes, pauses, or fails.
    async fn start(&self) -> TransferOutcome;

    /// Requests a cooperative pause. `start` returns a paused outcome.
    fn pause(&self);

    /// Clears a pause request and runs again from the persisted state.
    async fn resume(&self) -> TransferOutcome;

    /// Subscribes to progress events.
    fn subscribe(&self) -> watch::Receiver<ProgressEvent>;

    /// Destination path, once known.
    fn destination(&self) -> Option<PathBuf>;
}

/// Transfer of a direct resource URL.
#[derive(Debug)]
pub struct SegmentedTransfer {
    engine: TransferEngine,
}

impl SegmentedTransfer {
    /// Creates a transfer for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the request or config is out of range.
    pub fn new(request: TransferRequest, config: TransferConfig) -> Result<Self, EngineError> {
        Ok(Self {
            engine: TransferEngine::new(request, config)?,
        })
    }

    /// Shares an externally owned pause flag, e.g. one raised by a signal
    /// handler that outlives this transfer.
    #[must_use]
    pub fn with_shutdown(self, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            engine: self.engine.with_shutdown(shutdown),
        }
    }

    fn from_engine(engine: TransferEngine) -> Self {
        Self { engine }
    }

    /// The underlying request.
    #[must_use]
    pub fn request(&self) -> &TransferRequest {
        self.engine.request()
    }
}

#[async_trait]
impl Transfer for SegmentedTransfer {
    async fn start(&self) -> TransferOutcome {
        self.engine.run().await
    }

    fn pause(&self) {
        self.engine.pause();
    }

    async fn resume(&self) -> TransferOutcome {
        self.engine.clear_pause();
        self.engine.run().await
    }

    fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.engine.subscribe()
    }

    fn destination(&self) -> Option<PathBuf> {
        Some(self.engine.request().destination())
    }
}

/// A direct stream produced by a [`StreamResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    /// Direct, range-capable URL of the stream.
    pub url: String,
    /// Size reported by the platform, if any.
    pub size: Option<u64>,
    /// Suggested output filename, if any.
    pub filename: Option<String>,
}

/// Turns a page URL into a direct stream URL.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Resolves `source_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Resolve`] when no stream can be selected.
    async fn resolve(&self, source_url: &str) -> Result<ResolvedStream, TransferError>;
}

/// Transfer of a resource behind a [`StreamResolver`].
///
/// The pause flag and progress channel exist before resolution, so observers
/// and pause requests work from the moment the transfer is created.
pub struct ResolvedTransfer {
    source_url: String,
    output_dir: PathBuf,
    workers: usize,
    config: TransferConfig,
    resolver: Arc<dyn StreamResolver>,
    shutdown: Arc<AtomicBool>,
    progress_tx: watch::Sender<ProgressEvent>,
    inner: OnceLock<SegmentedTransfer>,
}

impl std::fmt::Debug for ResolvedTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTransfer")
            .field("source_url", &self.source_url)
            .field("output_dir", &self.output_dir)
            .field("workers", &self.workers)
            .field("resolved", &self.inner.get().is_some())
            .finish_non_exhaustive()
    }
}

impl ResolvedTransfer {
    /// Creates a transfer that resolves `source_url` on first start.
    #[must_use]
    pub fn new(
        source_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        workers: usize,
        config: TransferConfig,
        resolver: Arc<dyn StreamResolver>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(ProgressEvent::default());
        Self {
            source_url: source_url.into(),
            output_dir: output_dir.into(),
            workers,
            config,
            resolver,
            shutdown: Arc::new(AtomicBool::new(false)),
            progress_tx,
            inner: OnceLock::new(),
        }
    }

    fn failed(&self, error: TransferError) -> TransferOutcome {
        warn!(error = %error, "stream resolution failed");
        self.progress_tx
            .send_replace(ProgressEvent::new(TransferState::Failed, 0, None, 0.0));
        TransferOutcome {
            status: TransferStatus::Failed,
            path: self.output_dir.clone(),
            bytes_downloaded: 0,
            error: Some(error),
        }
    }

    /// Resolves once and caches the delegate transfer.
    async fn delegate(&self) -> Result<&SegmentedTransfer, TransferError> {
        if let Some(inner) = self.inner.get() {
            return Ok(inner);
        }

        let stream = self.resolver.resolve(&self.source_url).await?;
        info!(stream_url = %stream.url, size = ?stream.size, "stream resolved");

        let mut request = TransferRequest::new(stream.url, self.output_dir.clone())
            .with_workers(self.workers)
            .with_size_hint(stream.size);
        if let Some(filename) = stream.filename.as_deref() {
            request = request.with_filename(filename);
        }
        let engine = TransferEngine::new(request, self.config.clone())
            .map_err(|e| TransferError::resolve(&self.source_url, e.to_string()))?
            .with_shutdown(Arc::clone(&self.shutdown))
            .with_progress(self.progress_tx.clone());

        Ok(self
            .inner
            .get_or_init(|| SegmentedTransfer::from_engine(engine)))
    }
}

#[async_trait]
impl Transfer for ResolvedTransfer {
    #[instrument(skip(self), fields(source_url = %self.source_url))]
    async fn start(&self) -> TransferOutcome {
        match self.delegate().await {
            Ok(inner) => inner.start().await,
            Err(e) => self.failed(e),
        }
    }

    fn pause(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    async fn resume(&self) -> TransferOutcome {
        self.shutdown.store(false, Ordering::SeqCst);
        self.start().await
    }

    fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    fn destination(&self) -> Option<PathBuf> {
        self.inner
            .get()
            .and_then(|inner| inner.destination())
    }
}
