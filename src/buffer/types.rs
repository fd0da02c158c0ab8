//! Shared types for the buffer engine

use crate::events::Progress;
use serde::{Deserialize, Serialize};

/// Player state vocabulary shared with the player shell.
///
/// The buffer controller itself only ever holds `Null` or `Playing`;
/// `Buffering` and `Paused` exist for the surrounding player and are
/// rejected by [`set_state`](crate::BufferController::set_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    /// Idle, no download, no progress polling
    Null,
    /// Player is waiting for the buffer to fill
    Buffering,
    /// Player is paused
    Paused,
    /// Download in progress, progress polling active
    Playing,
}

/// Progress as computed on one poll tick. Ephemeral: recomputed fresh every
/// tick, never cached beyond the `Update` event it feeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Percentage of the file safely on disk, or `Unknown`
    pub progress: Progress,
    /// Whether the playback pipeline has reported end of stream
    pub end_of_stream: bool,
}

/// Convert raw byte counters into a progress percentage.
///
/// The safety margin is subtracted from the written count *before* dividing:
/// trailing bytes may still sit in OS or network buffers and are not yet
/// safely decodable. The result is floored at zero and capped at 100.
/// Returns `Unknown` when the total is absent or zero.
pub fn compute_percent(written_bytes: u64, total_bytes: Option<u64>, safety_margin: u64) -> Progress {
    match total_bytes {
        None | Some(0) => Progress::Unknown,
        Some(total) => {
            let usable = written_bytes.saturating_sub(safety_margin);
            let percent = (usable as f64 / total as f64) * 100.0;
            Progress::Percent(percent.clamp(0.0, 100.0) as f32)
        }
    }
}
