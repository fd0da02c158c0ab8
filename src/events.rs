//! Events published by the buffer controller
//!
//! The controller emits events over a registered
//! `tokio::sync::mpsc::UnboundedSender<BufferEvent>`; the player shell
//! subscribes once and reacts (progress bar, playback start gating).

use serde::{Deserialize, Serialize};

/// Download progress as exposed to the player shell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Progress {
    /// The transport cannot estimate progress yet. Callers should show an
    /// indeterminate spinner rather than a percentage.
    Unknown,

    /// Percentage of the file safely on disk, in [0, 100]
    Percent(f32),
}

impl Progress {
    /// Scalar form: percentage in [0, 100], or -1.0 for [`Progress::Unknown`]
    pub fn as_percent(&self) -> f32 {
        match self {
            Progress::Unknown => -1.0,
            Progress::Percent(p) => *p,
        }
    }

    /// True if progress is a known percentage
    pub fn is_known(&self) -> bool {
        matches!(self, Progress::Percent(_))
    }
}

/// Events emitted by the buffer controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferEvent {
    /// Periodic buffering progress while the controller is playing
    Update {
        /// Fresh progress snapshot for this poll tick
        progress: Progress,
    },

    /// Enough decodable media exists on disk to start local playback.
    /// Fires at most once per load.
    Ready {
        /// Probe restart cycles it took to confirm readiness
        attempts: u32,
    },

    /// The download died (unreachable source or mid-stream error) and will
    /// not recover on its own. Fires at most once per load; the caller
    /// decides whether to tear the session down or retry with a new load.
    TransferFailed,
}
