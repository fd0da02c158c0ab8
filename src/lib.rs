//! # prebuf
//!
//! Progressive-download buffer engine for a streaming video player.
//!
//! **Purpose:** download a media file into a local cache file while a
//! concurrent readiness probe decides, as early as possible, when enough
//! decodable data exists on disk for the player to start local playback.
//! Playback is gated on the probe's `Ready` event, not on 100% download
//! completion.
//!
//! **Architecture:** a [`BufferController`] composing a download sink
//! (reqwest streaming into tokio file I/O) and a readiness prober
//! (symphonia container probe + packet decode), with timer-driven progress
//! polling and mpsc event delivery.

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod source;

pub use buffer::{BufferController, PlayerState, ProgressSnapshot};
pub use config::BufferConfig;
pub use error::{Error, Result};
pub use events::{BufferEvent, Progress};
