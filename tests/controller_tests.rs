//! Buffer controller integration tests
//!
//! Drives a full controller (sink + prober + poll timer) against scripted
//! in-memory sources carrying real WAV bytes, so readiness is proven by an
//! actual container probe and packet decode.

use async_stream::stream;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::StreamExt;
use prebuf::source::{MediaSource, SourceStream};
use prebuf::{BufferConfig, BufferController, BufferEvent, Error, PlayerState, Progress, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prebuf=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Generate a playable stereo 16-bit WAV entirely in memory
fn wav_bytes(frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Source replaying fixed chunks with an optional delay between them
struct ScriptedSource {
    total: Option<u64>,
    chunks: Vec<Vec<u8>>,
    chunk_delay: Duration,
}

impl ScriptedSource {
    fn from_bytes(bytes: &[u8], chunk_size: usize, chunk_delay: Duration) -> Self {
        Self {
            total: Some(bytes.len() as u64),
            chunks: bytes.chunks(chunk_size).map(|c| c.to_vec()).collect(),
            chunk_delay,
        }
    }
}

impl MediaSource for ScriptedSource {
    fn open(&self, _uri: &str) -> BoxFuture<'static, Result<SourceStream>> {
        let total = self.total;
        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        Box::pin(async move {
            let data = stream! {
                for chunk in chunks {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    yield Ok(Bytes::from(chunk));
                }
            }
            .boxed();
            Ok(SourceStream {
                total_bytes: total,
                data,
            })
        })
    }
}

/// Source whose open call never resolves (unreachable transport)
struct StalledSource;

impl MediaSource for StalledSource {
    fn open(&self, _uri: &str) -> BoxFuture<'static, Result<SourceStream>> {
        Box::pin(async move {
            futures::future::pending::<()>().await;
            unreachable!()
        })
    }
}

/// Source whose open call fails outright (source refuses the connection)
struct RefusingSource;

impl MediaSource for RefusingSource {
    fn open(&self, _uri: &str) -> BoxFuture<'static, Result<SourceStream>> {
        Box::pin(async move {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        })
    }
}

fn test_config(cache_dir: &Path) -> BufferConfig {
    BufferConfig {
        cache_dir: cache_dir.to_path_buf(),
        safety_margin_bytes: 0,
        probe_min_bytes: 1_000,
        poll_interval_ms: 10,
        probe_retry_delay_ms: 10,
        probe_packet_budget: 2,
    }
}

/// Collect events until a Ready is seen, failing after `deadline`
async fn collect_until_ready(
    rx: &mut mpsc::UnboundedReceiver<BufferEvent>,
    deadline: Duration,
) -> Vec<BufferEvent> {
    let mut events = Vec::new();
    timeout(deadline, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            let is_ready = matches!(event, BufferEvent::Ready { .. });
            events.push(event);
            if is_ready {
                break;
            }
        }
    })
    .await
    .expect("no Ready event before deadline");
    events
}

/// Drain whatever is currently queued on the channel
fn drain(rx: &mut mpsc::UnboundedReceiver<BufferEvent>) -> Vec<BufferEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_load_play_reports_progress_then_ready() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(20_000);
    let source = Arc::new(ScriptedSource::from_bytes(
        &wav,
        4096,
        Duration::from_millis(5),
    ));

    let controller = BufferController::with_source(test_config(dir.path()), source).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    let path = controller.load("mem://video").await.unwrap();
    assert!(path.starts_with(dir.path()));
    assert_eq!(controller.current_path().await, Some(path.clone()));

    controller.set_state(PlayerState::Playing).await.unwrap();
    let events = collect_until_ready(&mut rx, Duration::from_secs(10)).await;

    // The poll timer produced updates, and playback was gated on Ready
    // well before 100% download was required.
    assert!(events
        .iter()
        .any(|e| matches!(e, BufferEvent::Update { .. })));
    assert!(controller.is_ready().await);

    // A known percentage appears once the transport has answered
    assert!(events.iter().any(|e| matches!(
        e,
        BufferEvent::Update {
            progress: Progress::Percent(_)
        }
    )));

    controller.set_state(PlayerState::Null).await.unwrap();

    // The cache file holds (a prefix of) the source bytes
    let on_disk = std::fs::read(&path).unwrap();
    assert!(!on_disk.is_empty());
    assert!(wav.starts_with(&on_disk) || on_disk == wav);
}

#[tokio::test]
async fn test_ready_fires_once_per_load() {
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(20_000);
    let source = Arc::new(ScriptedSource::from_bytes(&wav, 8192, Duration::ZERO));

    let controller = BufferController::with_source(test_config(dir.path()), source).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    let first_path = controller.load("mem://video").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();
    collect_until_ready(&mut rx, Duration::from_secs(10)).await;

    // Keep polling well past readiness: no second Ready for this session
    tokio::time::sleep(Duration::from_millis(200)).await;
    let extra = drain(&mut rx);
    assert!(
        !extra.iter().any(|e| matches!(e, BufferEvent::Ready { .. })),
        "Ready must fire at most once per load"
    );

    // A new load resets the session: Ready fires exactly once again
    let second_path = controller.load("mem://video2").await.unwrap();
    assert_ne!(first_path, second_path, "each load gets a fresh cache file");
    drain(&mut rx);

    let events = collect_until_ready(&mut rx, Duration::from_secs(10)).await;
    let ready_count = events
        .iter()
        .filter(|e| matches!(e, BufferEvent::Ready { .. }))
        .count();
    assert_eq!(ready_count, 1);

    controller.set_state(PlayerState::Null).await.unwrap();
}

#[tokio::test]
async fn test_updates_unknown_while_transport_stalled() {
    let dir = tempfile::tempdir().unwrap();
    let controller =
        BufferController::with_source(test_config(dir.path()), Arc::new(StalledSource)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://unreachable").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();

    // Every update while the transport has no answer is the Unknown
    // sentinel, never a fabricated zero percent.
    for _ in 0..5 {
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("poll timer should be emitting")
            .unwrap();
        assert_eq!(
            event,
            BufferEvent::Update {
                progress: Progress::Unknown
            }
        );
    }

    controller.set_state(PlayerState::Null).await.unwrap();
}

#[tokio::test]
async fn test_eos_reports_100_until_flush() {
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(2_000);
    // Margin larger than the whole file: raw byte math would floor at zero,
    // but EOS must win and report 100 regardless.
    let config = BufferConfig {
        safety_margin_bytes: 10_000_000,
        ..test_config(dir.path())
    };
    let source = Arc::new(ScriptedSource::from_bytes(&wav, 8192, Duration::ZERO));

    let controller = BufferController::with_source(config, source).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://video").await.unwrap();
    controller.notify_end_of_stream().await;
    controller.set_state(PlayerState::Playing).await.unwrap();

    for _ in 0..5 {
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("poll timer should be emitting")
            .unwrap();
        assert_eq!(
            event,
            BufferEvent::Update {
                progress: Progress::Percent(100.0)
            }
        );
    }

    // Flush stops polling, clears the EOS flag, and reports zero once
    controller.flush().await.unwrap();
    let events = drain(&mut rx);
    assert_eq!(
        events.last(),
        Some(&BufferEvent::Update {
            progress: Progress::Percent(0.0)
        })
    );
}

#[tokio::test]
async fn test_safety_margin_floors_progress_at_zero() {
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(2_000);
    let config = BufferConfig {
        safety_margin_bytes: 10_000_000,
        ..test_config(dir.path())
    };
    let source = Arc::new(ScriptedSource::from_bytes(&wav, 8192, Duration::ZERO));

    let controller = BufferController::with_source(config, source).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://video").await.unwrap();
    // Let the tiny download finish so the query has a definite answer
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.set_state(PlayerState::Playing).await.unwrap();

    let event = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        BufferEvent::Update {
            progress: Progress::Percent(0.0)
        }
    );

    controller.set_state(PlayerState::Null).await.unwrap();
}

#[tokio::test]
async fn test_double_playing_keeps_single_poll_timer() {
    let dir = tempfile::tempdir().unwrap();
    let config = BufferConfig {
        poll_interval_ms: 50,
        ..test_config(dir.path())
    };
    let controller =
        BufferController::with_source(config, Arc::new(StalledSource)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://unreachable").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.set_state(PlayerState::Null).await.unwrap();

    // One 50ms timer yields ~11 ticks over 500ms; a duplicated timer would
    // roughly double that.
    let count = drain(&mut rx).len();
    assert!(count >= 5, "poll timer never ran ({} events)", count);
    assert!(count <= 15, "duplicate poll timers suspected ({} events)", count);
}

#[tokio::test]
async fn test_set_state_invalid_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(2_000);
    let source = Arc::new(ScriptedSource::from_bytes(&wav, 8192, Duration::ZERO));
    let controller = BufferController::with_source(test_config(dir.path()), source).unwrap();

    controller.load("mem://video").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();

    assert!(controller.set_state(PlayerState::Paused).await.is_err());
    assert_eq!(controller.state().await, PlayerState::Playing);

    controller.set_state(PlayerState::Null).await.unwrap();
    assert!(controller.set_state(PlayerState::Buffering).await.is_err());
    assert_eq!(controller.state().await, PlayerState::Null);
}

#[tokio::test]
async fn test_flush_destroys_probe_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    // Transport never answers, so the cache file is ours to grow by hand
    let controller =
        BufferController::with_source(test_config(dir.path()), Arc::new(StalledSource)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    let path = controller.load("mem://unreachable").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();
    // Give the poll timer time to start the prober (gated on file size)
    tokio::time::sleep(Duration::from_millis(50)).await;

    controller.flush().await.unwrap();
    assert_eq!(controller.current_path().await, None);
    drain(&mut rx);

    // Grow the flushed file past the probe gate with fully decodable media.
    // A leaked probe session would confirm it and deliver a stale Ready.
    std::fs::write(&path, wav_bytes(20_000)).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let after = drain(&mut rx);
    assert!(
        !after.iter().any(|e| matches!(e, BufferEvent::Ready { .. })),
        "Ready from a flushed session reached the caller"
    );
    assert!(!controller.is_ready().await);
}

#[tokio::test]
async fn test_transfer_failure_is_reported_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let controller =
        BufferController::with_source(test_config(dir.path()), Arc::new(RefusingSource)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://refused").await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();

    // The dead transfer is announced on the event channel
    let failed = timeout(Duration::from_secs(1), async {
        loop {
            match rx.recv().await.expect("event channel closed") {
                BufferEvent::TransferFailed => break,
                BufferEvent::Update {
                    progress: Progress::Unknown,
                } => continue,
                other => panic!("unexpected event before failure: {:?}", other),
            }
        }
    })
    .await;
    failed.expect("transfer failure was never reported");
    assert!(controller.is_download_failed());
    assert!(!controller.is_download_complete());

    // Announced exactly once; the poll keeps emitting plain updates
    tokio::time::sleep(Duration::from_millis(200)).await;
    let extra = drain(&mut rx);
    assert!(
        !extra.iter().any(|e| matches!(e, BufferEvent::TransferFailed)),
        "transfer failure must be reported at most once per load"
    );

    controller.set_state(PlayerState::Null).await.unwrap();
}

#[tokio::test]
async fn test_no_events_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let controller =
        BufferController::with_source(test_config(dir.path()), Arc::new(StalledSource)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    controller.load("mem://unreachable").await.unwrap();
    // Replace the poll timer once, then stop; neither timer may tick again
    controller.set_state(PlayerState::Playing).await.unwrap();
    controller.set_state(PlayerState::Playing).await.unwrap();
    controller.set_state(PlayerState::Null).await.unwrap();

    drain(&mut rx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        drain(&mut rx).is_empty(),
        "a stopped poll timer emitted after set_state returned"
    );
}

#[tokio::test]
async fn test_reload_tears_down_previous_session() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let wav = wav_bytes(20_000);
    // Slow enough that the first session would still be downloading
    let source = Arc::new(ScriptedSource::from_bytes(
        &wav,
        1024,
        Duration::from_millis(10),
    ));

    let controller = BufferController::with_source(test_config(dir.path()), source).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    controller.set_event_channel(tx).await;

    let first = controller.load("mem://a").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = controller.load("mem://b").await.unwrap();
    assert_ne!(first, second);

    // The first session's transfer was aborted: its file stops growing
    let len_then = std::fs::metadata(&first).map(|m| m.len()).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let len_now = std::fs::metadata(&first).map(|m| m.len()).unwrap_or(0);
    assert_eq!(len_then, len_now, "old session must be fully torn down");

    // The new session still reaches readiness
    controller.set_state(PlayerState::Playing).await.unwrap();
    collect_until_ready(&mut rx, Duration::from_secs(10)).await;

    controller.set_state(PlayerState::Null).await.unwrap();
}
