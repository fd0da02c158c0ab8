//! Buffer controller
//!
//! Public façade of the buffer engine. Owns the player-visible state,
//! composes the download sink and the readiness prober against a single
//! growing cache file, converts raw byte counters into progress, and fans
//! `Update`/`Ready` events out to the registered caller channel.
//!
//! The sink writes the cache file; the prober reads it concurrently. No
//! lock is held between them: the prober tolerates a file that is shorter
//! than expected and treats it as "not ready yet".

use crate::buffer::prober::{ProbeReady, ProbeSettings, ReadinessProber};
use crate::buffer::sink::{DownloadSink, SinkProgress};
use crate::buffer::types::{compute_percent, PlayerState, ProgressSnapshot};
use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::events::{BufferEvent, Progress};
use crate::source::{HttpSource, MediaSource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

type EventTx = Arc<RwLock<Option<mpsc::UnboundedSender<BufferEvent>>>>;

/// One in-flight download + probe pairing against a single cache file
struct Session {
    id: Uuid,
    sink_path: PathBuf,
    prober: Arc<ReadinessProber>,
}

/// Controller-owned mutable state
struct Inner {
    /// Only `Null` and `Playing` are ever stored here
    state: PlayerState,

    /// Set once the prober confirms the file playable; reset by load/flush
    ready: bool,

    /// Set when the playback pipeline reports end of stream
    end_of_stream: bool,

    /// Set once a dead transfer has been announced; reset by load/flush
    transfer_failed: bool,

    session: Option<Session>,
    poll_task: Option<JoinHandle<()>>,
    ready_task: Option<JoinHandle<()>>,
}

/// Progressive-download buffer controller.
///
/// Callers drive it with [`load`](Self::load) /
/// [`set_state`](Self::set_state) / [`flush`](Self::flush) and observe it
/// through the event channel registered with
/// [`set_event_channel`](Self::set_event_channel).
pub struct BufferController {
    config: BufferConfig,
    sink: Arc<DownloadSink>,
    event_tx: EventTx,
    inner: Arc<RwLock<Inner>>,
}

impl BufferController {
    /// Create a controller downloading over HTTP
    pub fn new(config: BufferConfig) -> Result<Self> {
        Self::with_source(config, Arc::new(HttpSource::new()))
    }

    /// Create a controller pulling from a caller-supplied source
    pub fn with_source(config: BufferConfig, source: Arc<dyn MediaSource>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink: Arc::new(DownloadSink::new(source)),
            event_tx: Arc::new(RwLock::new(None)),
            inner: Arc::new(RwLock::new(Inner {
                state: PlayerState::Null,
                ready: false,
                end_of_stream: false,
                transfer_failed: false,
                session: None,
                poll_task: None,
                ready_task: None,
            })),
        })
    }

    /// Register the channel `Update`/`Ready` events are delivered on
    pub async fn set_event_channel(&self, tx: mpsc::UnboundedSender<BufferEvent>) {
        *self.event_tx.write().await = Some(tx);
    }

    /// Start buffering `uri` into a fresh cache file.
    ///
    /// Any previous session is fully torn down first: its prober stops, its
    /// ready forwarder is cancelled, and the sink transfer is aborted, so no
    /// stale callback can fire into the new session. Returns the cache file
    /// path so the caller can point its playback pipeline at the same
    /// growing file.
    pub async fn load(&self, uri: &str) -> Result<PathBuf> {
        self.teardown_session().await;

        let sink_path = self.fresh_sink_path()?;
        self.sink.start(uri, &sink_path).await;

        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        let prober = Arc::new(ReadinessProber::new(
            sink_path.clone(),
            ProbeSettings {
                min_bytes: self.config.probe_min_bytes,
                retry_delay: self.config.probe_retry_delay(),
                packet_budget: self.config.probe_packet_budget,
            },
            probe_tx,
        ));

        let session_id = Uuid::new_v4();
        let ready_task = tokio::spawn(ready_forward_task(
            probe_rx,
            Arc::clone(&self.inner),
            Arc::clone(&self.event_tx),
            session_id,
        ));

        let mut inner = self.inner.write().await;
        inner.ready = false;
        inner.end_of_stream = false;
        inner.transfer_failed = false;
        inner.ready_task = Some(ready_task);
        inner.session = Some(Session {
            id: session_id,
            sink_path: sink_path.clone(),
            prober,
        });

        info!(
            "Session {} buffering {} into {}",
            session_id,
            uri,
            sink_path.display()
        );

        Ok(sink_path)
    }

    /// Transition the controller state.
    ///
    /// Only `Null` (stop polling, stop the download) and `Playing` (start
    /// the progress poll timer) are accepted; anything else fails with
    /// [`Error::InvalidState`] and leaves the stored state unchanged.
    /// Starting while already playing replaces the poll timer; there is
    /// never more than one.
    pub async fn set_state(&self, state: PlayerState) -> Result<()> {
        match state {
            PlayerState::Null => {
                let poll_task = {
                    let mut inner = self.inner.write().await;
                    inner.state = PlayerState::Null;
                    inner.poll_task.take()
                };
                // Wait the abort out so no tick can fire after we return
                if let Some(handle) = poll_task {
                    handle.abort();
                    let _ = handle.await;
                }

                self.sink.stop().await;
                debug!("Controller state -> Null");
                Ok(())
            }
            PlayerState::Playing => {
                let replaced = {
                    let mut inner = self.inner.write().await;
                    let replaced = inner.poll_task.take();
                    inner.poll_task = Some(tokio::spawn(poll_task(
                        self.config.clone(),
                        Arc::clone(&self.sink),
                        Arc::clone(&self.inner),
                        Arc::clone(&self.event_tx),
                    )));
                    inner.state = PlayerState::Playing;
                    replaced
                };
                // Wait the replaced timer out so only the new one can emit
                if let Some(handle) = replaced {
                    handle.abort();
                    let _ = handle.await;
                }
                debug!("Controller state -> Playing");
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "state must be Null or Playing, not {:?}",
                other
            ))),
        }
    }

    /// Reset for a new video: stop polling, destroy the whole session
    /// (prober, ready forwarder, download), clear the ready/end-of-stream
    /// flags, and emit one final zero update. After this returns no event
    /// from the flushed session can reach the caller.
    pub async fn flush(&self) -> Result<()> {
        self.set_state(PlayerState::Null).await?;
        self.teardown_session().await;

        let mut inner = self.inner.write().await;
        inner.ready = false;
        inner.end_of_stream = false;
        inner.transfer_failed = false;
        drop(inner);

        emit(
            &self.event_tx,
            BufferEvent::Update {
                progress: Progress::Percent(0.0),
            },
        )
        .await;
        Ok(())
    }

    /// End-of-stream notification from the playback pipeline (a different
    /// pipeline than the download; their byte counters may disagree). Every
    /// subsequent update reports 100 until the next load or flush.
    pub async fn notify_end_of_stream(&self) {
        let mut inner = self.inner.write().await;
        inner.end_of_stream = true;
    }

    /// Current controller state
    pub async fn state(&self) -> PlayerState {
        self.inner.read().await.state
    }

    /// True once the current session's file has been confirmed playable
    pub async fn is_ready(&self) -> bool {
        self.inner.read().await.ready
    }

    /// True once the current download finished without error
    pub fn is_download_complete(&self) -> bool {
        self.sink.is_complete()
    }

    /// True if the current download died; also announced once on the event
    /// channel as [`BufferEvent::TransferFailed`]
    pub fn is_download_failed(&self) -> bool {
        self.sink.is_failed()
    }

    /// Cache file path of the current session, if one is loaded
    pub async fn current_path(&self) -> Option<PathBuf> {
        self.inner
            .read()
            .await
            .session
            .as_ref()
            .map(|s| s.sink_path.clone())
    }

    /// Progress as it would be reported on the next poll tick
    pub async fn snapshot(&self) -> ProgressSnapshot {
        compute_snapshot(&self.config, &self.sink, &self.inner).await
    }

    /// Generate a fresh unique cache path for one load
    fn fresh_sink_path(&self) -> Result<PathBuf> {
        let tmp = tempfile::Builder::new()
            .prefix("prebuf-")
            .tempfile_in(&self.config.cache_dir)?;
        let (_file, path) = tmp
            .keep()
            .map_err(|e| Error::Io(e.error))?;
        Ok(path)
    }

    /// Stop the previous session's prober, forwarder, and transfer
    async fn teardown_session(&self) {
        let (session, ready_task) = {
            let mut inner = self.inner.write().await;
            (inner.session.take(), inner.ready_task.take())
        };

        if let Some(handle) = ready_task {
            handle.abort();
            // Wait the abort out so a buffered ready signal cannot be
            // forwarded after teardown
            let _ = handle.await;
        }
        if let Some(session) = session {
            session.prober.stop().await;
            debug!("Session {} torn down", session.id);
        }
        self.sink.stop().await;
    }
}

/// Deliver an event to the registered channel, if any
async fn emit(event_tx: &EventTx, event: BufferEvent) {
    let tx = event_tx.read().await;
    if let Some(ref tx) = *tx {
        if let Err(e) = tx.send(event) {
            debug!("Event receiver dropped: {}", e);
        }
    }
}

/// Compute one tick's snapshot. End of stream strictly precedes the byte
/// math: an EOS always reports 100 regardless of what the counters say.
async fn compute_snapshot(
    config: &BufferConfig,
    sink: &Arc<DownloadSink>,
    inner: &Arc<RwLock<Inner>>,
) -> ProgressSnapshot {
    if inner.read().await.end_of_stream {
        return ProgressSnapshot {
            progress: Progress::Percent(100.0),
            end_of_stream: true,
        };
    }

    let progress = match sink.query_progress().await {
        SinkProgress::Unknown => Progress::Unknown,
        SinkProgress::Transferring {
            written_bytes,
            total_bytes,
        } => compute_percent(written_bytes, total_bytes, config.safety_margin_bytes),
    };

    ProgressSnapshot {
        progress,
        end_of_stream: false,
    }
}

/// Recurring progress poll while the controller is playing
async fn poll_task(
    config: BufferConfig,
    sink: Arc<DownloadSink>,
    inner: Arc<RwLock<Inner>>,
    event_tx: EventTx,
) {
    let mut interval = time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let snapshot = compute_snapshot(&config, &sink, &inner).await;
        emit(
            &event_tx,
            BufferEvent::Update {
                progress: snapshot.progress,
            },
        )
        .await;

        if snapshot.end_of_stream {
            continue;
        }

        // Announce a dead transfer exactly once per session. The poll keeps
        // running so the caller still sees updates until it reacts.
        if sink.is_failed() {
            let first = {
                let mut inner = inner.write().await;
                if inner.session.is_none() || inner.transfer_failed {
                    false
                } else {
                    inner.transfer_failed = true;
                    true
                }
            };
            if first {
                warn!("Transfer died; notifying caller");
                emit(&event_tx, BufferEvent::TransferFailed).await;
            }
        }

        // Until the session is ready, keep (re)starting the prober. This is
        // idempotent; once ready it becomes a no-op and stops being issued.
        let prober = {
            let inner = inner.read().await;
            if inner.ready {
                None
            } else {
                inner.session.as_ref().map(|s| Arc::clone(&s.prober))
            }
        };
        if let Some(prober) = prober {
            prober.ensure_running().await;
        }
    }
}

/// Wait for the prober's one-shot ready signal and forward it to the caller
/// exactly once, marking the session ready.
async fn ready_forward_task(
    mut probe_rx: mpsc::UnboundedReceiver<ProbeReady>,
    inner: Arc<RwLock<Inner>>,
    event_tx: EventTx,
    session_id: Uuid,
) {
    if let Some(ready) = probe_rx.recv().await {
        {
            let mut inner = inner.write().await;
            if inner.ready {
                return;
            }
            inner.ready = true;
        }
        info!(
            "Session {} buffered enough for playback ({} probe retries)",
            session_id, ready.attempts
        );
        emit(
            &event_tx,
            BufferEvent::Ready {
                attempts: ready.attempts,
            },
        )
        .await;
    }
}
