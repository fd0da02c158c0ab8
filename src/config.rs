//! Buffer engine configuration
//!
//! All tuning knobs are explicit configuration passed into constructors; the
//! two empirically chosen thresholds (probe minimum size and safety margin)
//! carry the values observed to work in practice but remain adjustable.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Buffer engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Directory in which per-load cache files are created
    pub cache_dir: PathBuf,

    /// Bytes subtracted from the written count before computing progress.
    /// Trailing bytes may still sit in OS/network buffers and are not yet
    /// safely decodable.
    pub safety_margin_bytes: u64,

    /// Minimum bytes on disk before a readiness probe attempt is started.
    /// Guards against false positives on too-short files.
    pub probe_min_bytes: u64,

    /// Period of the progress poll timer in milliseconds
    pub poll_interval_ms: u64,

    /// Delay before retrying a failed probe attempt, in milliseconds
    pub probe_retry_delay_ms: u64,

    /// Packets that must decode cleanly before the file counts as playable
    pub probe_packet_budget: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir(),
            safety_margin_bytes: 500_000,
            probe_min_bytes: 200_000,
            poll_interval_ms: 100,
            probe_retry_delay_ms: 100,
            probe_packet_budget: 4,
        }
    }
}

impl BufferConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: BufferConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be non-zero".to_string()));
        }
        if self.probe_retry_delay_ms == 0 {
            return Err(Error::Config(
                "probe_retry_delay_ms must be non-zero".to_string(),
            ));
        }
        if self.probe_packet_budget == 0 {
            return Err(Error::Config(
                "probe_packet_budget must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll timer period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Probe retry delay
    pub fn probe_retry_delay(&self) -> Duration {
        Duration::from_millis(self.probe_retry_delay_ms)
    }
}
