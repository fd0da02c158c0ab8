//! Readiness prober
//!
//! Periodically attempts to decode a prefix of the partially-written sink
//! file to confirm it is valid, playable media. "Enough bytes on disk" is
//! not the same as "playable": a large file may still lack a complete
//! container header or index, so readiness is proven by actually probing
//! the container and decoding a few packets.
//!
//! Probe failure on a short file is the expected steady state until the
//! download catches up; the prober tears the attempt down and retries after
//! a short delay instead of escalating.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Probe lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProbeState {
    /// No decode attempt in flight
    Idle,
    /// A decode attempt is running
    Probing,
    /// The file has been confirmed playable; no further attempts
    Succeeded,
}

/// Event sent to the controller when the file first proves playable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReady {
    /// Restart cycles it took to confirm readiness
    pub attempts: u32,
}

/// Tuning for one probe session
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Minimum bytes on disk before an attempt is started
    pub min_bytes: u64,
    /// Delay between failed attempts
    pub retry_delay: Duration,
    /// Packets that must decode cleanly before declaring readiness
    pub packet_budget: usize,
}

struct ProbeShared {
    /// Encoded [`ProbeState`]
    state: AtomicU8,
    attempts: AtomicU32,
    succeeded: AtomicBool,
    stopping: AtomicBool,
}

impl ProbeShared {
    fn set_state(&self, state: ProbeState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn state(&self) -> ProbeState {
        match self.state.load(Ordering::Relaxed) {
            1 => ProbeState::Probing,
            2 => ProbeState::Succeeded,
            _ => ProbeState::Idle,
        }
    }
}

/// One readiness-probe session against a growing file.
///
/// At most one decode attempt is live at a time; a failed attempt fully
/// tears down (the blocking probe call returns and its file handle drops)
/// before the next one starts.
pub struct ReadinessProber {
    path: PathBuf,
    settings: ProbeSettings,
    shared: Arc<ProbeShared>,
    ready_tx: mpsc::UnboundedSender<ProbeReady>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessProber {
    /// Create a prober for `path`. Probing does not start until
    /// [`ensure_running`](Self::ensure_running) is called.
    pub fn new(
        path: PathBuf,
        settings: ProbeSettings,
        ready_tx: mpsc::UnboundedSender<ProbeReady>,
    ) -> Self {
        Self {
            path,
            settings,
            shared: Arc::new(ProbeShared {
                state: AtomicU8::new(ProbeState::Idle as u8),
                attempts: AtomicU32::new(0),
                succeeded: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
            }),
            ready_tx,
            task: Mutex::new(None),
        }
    }

    /// Start the probe loop if it is not already running. Idempotent; a
    /// no-op once the session has succeeded or been stopped.
    pub async fn ensure_running(&self) {
        if self.shared.succeeded.load(Ordering::Relaxed)
            || self.shared.stopping.load(Ordering::Relaxed)
        {
            return;
        }

        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        *task = Some(tokio::spawn(probe_loop(
            self.path.clone(),
            self.settings.clone(),
            Arc::clone(&self.shared),
            self.ready_tx.clone(),
        )));
    }

    /// Tear down the active decode attempt; safe to call from any state.
    pub async fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Relaxed);
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.set_state(ProbeState::Idle);
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProbeState {
        self.shared.state()
    }

    /// Restart cycles since the session began
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    /// True once the file has been confirmed playable
    pub fn succeeded(&self) -> bool {
        self.shared.succeeded.load(Ordering::Relaxed)
    }
}

/// Retry loop: gate on file size, run one blocking probe attempt, and on
/// failure reset to idle and go around again after the retry delay.
async fn probe_loop(
    path: PathBuf,
    settings: ProbeSettings,
    shared: Arc<ProbeShared>,
    ready_tx: mpsc::UnboundedSender<ProbeReady>,
) {
    loop {
        if shared.stopping.load(Ordering::Relaxed) {
            return;
        }

        // Minimum-size gate: treat a short file as not-yet-ready, not as a
        // probe failure worth counting.
        let on_disk = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if on_disk < settings.min_bytes {
            trace!(
                "Probe gate not met for {}: {} < {} bytes",
                path.display(),
                on_disk,
                settings.min_bytes
            );
            tokio::time::sleep(settings.retry_delay).await;
            continue;
        }

        shared.set_state(ProbeState::Probing);

        let probe_path = path.clone();
        let budget = settings.packet_budget;
        let outcome = tokio::task::spawn_blocking(move || probe_file(&probe_path, budget)).await;

        match outcome {
            Ok(Ok(())) => {
                shared.succeeded.store(true, Ordering::Relaxed);
                shared.set_state(ProbeState::Succeeded);
                let attempts = shared.attempts.load(Ordering::Relaxed);
                info!(
                    "File {} confirmed playable after {} failed attempts",
                    path.display(),
                    attempts
                );
                let _ = ready_tx.send(ProbeReady { attempts });
                return;
            }
            Ok(Err(e)) => {
                // Ordinary while the file is still short.
                shared.attempts.fetch_add(1, Ordering::Relaxed);
                shared.set_state(ProbeState::Idle);
                debug!("Probe attempt on {} failed: {}", path.display(), e);
            }
            Err(e) => {
                shared.attempts.fetch_add(1, Ordering::Relaxed);
                shared.set_state(ProbeState::Idle);
                debug!("Probe task on {} aborted: {}", path.display(), e);
            }
        }

        tokio::time::sleep(settings.retry_delay).await;
    }
}

/// One blocking probe attempt: open the file, probe the container, find a
/// decodable track, and decode a small packet budget from it.
fn probe_file(path: &Path, packet_budget: usize) -> Result<()> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Hint the format registry with the file extension, if any
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Probe(format!("container probe failed: {}", e)))?;
    let mut format = probed.format;

    let (track_id, codec_params) = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .map(|t| (t.id, t.codec_params.clone()))
        .ok_or_else(|| Error::Probe("no decodable track".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Probe(format!("no decoder for track: {}", e)))?;

    // Walk a fixed amount of content; a clean header alone is not enough.
    let mut decoded = 0usize;
    while decoded < packet_budget {
        let packet = format
            .next_packet()
            .map_err(|e| Error::Probe(format!("packet read failed: {}", e)))?;
        if packet.track_id() != track_id {
            continue;
        }
        decoder
            .decode(&packet)
            .map_err(|e| Error::Probe(format!("packet decode failed: {}", e)))?;
        decoded += 1;
    }

    Ok(())
}
