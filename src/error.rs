//! Error types for prebuf
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the buffer engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport errors from the download source
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Readiness probe errors (expected transients while the file is short)
    #[error("Probe error: {0}")]
    Probe(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using the buffer engine Error
pub type Result<T> = std::result::Result<T, Error>;
