//! HTTP media source using reqwest streaming

use super::{MediaSource, SourceStream};
use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

/// Streams a remote resource over HTTP GET
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source with a fresh client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a source reusing an existing client (shared connection pool)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaSource for HttpSource {
    fn open(&self, uri: &str) -> BoxFuture<'static, Result<SourceStream>> {
        let client = self.client.clone();
        let uri = uri.to_string();

        Box::pin(async move {
            let response = client.get(&uri).send().await?.error_for_status()?;

            let total_bytes = response.content_length();
            debug!(
                "Opened HTTP source {} (content length: {:?})",
                uri, total_bytes
            );

            let data = response.bytes_stream().map_err(Error::from).boxed();

            Ok(SourceStream { total_bytes, data })
        })
    }
}
