//! Download sink
//!
//! Streams bytes from a [`MediaSource`] into a named local file on a
//! background task, exposing queryable progress. Owns no policy: the
//! controller decides when to start, poll, and stop.

use crate::source::MediaSource;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Answer to a progress query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkProgress {
    /// The transport has not answered yet; callers must not treat this as
    /// zero progress
    Unknown,

    /// Transfer underway (or finished): bytes persisted so far, and the
    /// remote size if the server reported one
    Transferring {
        written_bytes: u64,
        total_bytes: Option<u64>,
    },
}

/// Counters shared between the transfer task and progress queries
struct SinkShared {
    /// Bytes persisted to the sink file so far; monotone within a transfer
    written_bytes: AtomicU64,

    /// Remote content length, once the transport has answered
    total_bytes: RwLock<Option<u64>>,

    /// Set once the transport has produced a response
    connected: AtomicBool,

    /// Set when the stream ended normally
    complete: AtomicBool,

    /// Set when the transfer died (unreachable source, mid-stream error)
    failed: AtomicBool,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            written_bytes: AtomicU64::new(0),
            total_bytes: RwLock::new(None),
            connected: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    async fn reset(&self) {
        self.written_bytes.store(0, Ordering::Relaxed);
        *self.total_bytes.write().await = None;
        self.connected.store(false, Ordering::Relaxed);
        self.complete.store(false, Ordering::Relaxed);
        self.failed.store(false, Ordering::Relaxed);
    }
}

/// Streams a remote resource into a local file
pub struct DownloadSink {
    source: Arc<dyn MediaSource>,
    shared: Arc<SinkShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadSink {
    /// Create a sink pulling from the given source
    pub fn new(source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            shared: Arc::new(SinkShared::new()),
            task: Mutex::new(None),
        }
    }

    /// Begin an asynchronous transfer of `uri` into `path`.
    ///
    /// A previous transfer, if any, is stopped first and all counters reset.
    /// `path` must be freshly generated per load; the sink truncates it.
    /// Transport failures are reported via [`DownloadSink::is_failed`] and a
    /// warning log, never as a panic.
    pub async fn start(&self, uri: &str, path: &Path) {
        self.stop().await;
        self.shared.reset().await;

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);
        let uri = uri.to_string();
        let path = path.to_path_buf();

        let mut task = self.task.lock().await;
        *task = Some(tokio::spawn(transfer_task(source, shared, uri, path)));
    }

    /// Non-blocking progress query.
    ///
    /// Returns [`SinkProgress::Unknown`] until the transport has answered,
    /// rather than stale or fabricated counters.
    pub async fn query_progress(&self) -> SinkProgress {
        if !self.shared.connected.load(Ordering::Relaxed) {
            return SinkProgress::Unknown;
        }
        SinkProgress::Transferring {
            written_bytes: self.shared.written_bytes.load(Ordering::Relaxed),
            total_bytes: *self.shared.total_bytes.read().await,
        }
    }

    /// Cancel the transfer and release the destination file handle.
    /// Idempotent: safe to call when already stopped.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            // Wait out the abort so the file handle is released before we
            // return; a JoinError here is the expected cancellation.
            let _ = handle.await;
        }
    }

    /// True once the stream ended normally
    pub fn is_complete(&self) -> bool {
        self.shared.complete.load(Ordering::Relaxed)
    }

    /// True if the transfer died; the controller announces this to the
    /// caller, it does not retry the download itself
    pub fn is_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Relaxed)
    }
}

/// Body of the transfer task: open the source, then append every chunk to
/// the sink file, bumping the shared counters as bytes land on disk.
async fn transfer_task(
    source: Arc<dyn MediaSource>,
    shared: Arc<SinkShared>,
    uri: String,
    path: PathBuf,
) {
    let opened = match source.open(&uri).await {
        Ok(opened) => opened,
        Err(e) => {
            warn!("Download source {} unreachable: {}", uri, e);
            shared.failed.store(true, Ordering::Relaxed);
            return;
        }
    };

    *shared.total_bytes.write().await = opened.total_bytes;
    shared.connected.store(true, Ordering::Relaxed);

    let mut file = match tokio::fs::File::create(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!("Failed to create sink file {}: {}", path.display(), e);
            shared.failed.store(true, Ordering::Relaxed);
            return;
        }
    };

    let mut data = opened.data;
    while let Some(chunk) = data.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Download of {} aborted mid-stream: {}", uri, e);
                shared.failed.store(true, Ordering::Relaxed);
                return;
            }
        };

        if let Err(e) = file.write_all(&chunk).await {
            warn!("Write to {} failed: {}", path.display(), e);
            shared.failed.store(true, Ordering::Relaxed);
            return;
        }
        // Flush per chunk so the prober sees bytes as soon as we count them.
        if let Err(e) = file.flush().await {
            warn!("Flush of {} failed: {}", path.display(), e);
            shared.failed.store(true, Ordering::Relaxed);
            return;
        }

        shared
            .written_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    shared.complete.store(true, Ordering::Relaxed);
    debug!(
        "Download of {} complete: {} bytes in {}",
        uri,
        shared.written_bytes.load(Ordering::Relaxed),
        path.display()
    );
}
