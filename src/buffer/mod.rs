//! Progressive-download buffer engine
//!
//! Three cooperating pieces share one growing cache file:
//!
//! - [`DownloadSink`] streams the remote resource into the file (writer)
//! - [`ReadinessProber`] speculatively decodes the file prefix to detect
//!   "enough valid data to play" (reader)
//! - [`BufferController`] orchestrates both, owns the state machine, and
//!   emits progress/readiness events to the caller

mod controller;
mod prober;
mod sink;
mod types;

pub use controller::BufferController;
pub use prober::{ProbeReady, ProbeSettings, ProbeState, ReadinessProber};
pub use sink::{DownloadSink, SinkProgress};
pub use types::{compute_percent, PlayerState, ProgressSnapshot};
