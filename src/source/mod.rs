//! Streamed media sources
//!
//! The download sink pulls bytes through the [`MediaSource`] seam rather
//! than talking to HTTP directly, so transports can be swapped (and tests
//! can script byte arrival without a network).

mod http;

pub use http::HttpSource;

use crate::error::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// An opened transfer: the remote size, if the transport reported one, and
/// the byte stream itself.
pub struct SourceStream {
    /// Remote content length, absent if the server did not report one
    pub total_bytes: Option<u64>,

    /// Chunked byte stream; ends on transfer completion, yields an error on
    /// transport failure
    pub data: BoxStream<'static, Result<Bytes>>,
}

/// A pull source the download sink can stream from
pub trait MediaSource: Send + Sync {
    /// Open the resource at `uri` for streaming
    fn open(&self, uri: &str) -> BoxFuture<'static, Result<SourceStream>>;
}
