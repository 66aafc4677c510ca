//! Downloader strategies
//!
//! A [`Downloader`] streams one remote resource into a destination writer and
//! reports what it learned about it as [`Metadata`]. The [`DownloaderRegistry`]
//! picks the strategy for a task's [`DownloadType`]; a type with no registered
//! downloader is unsupported.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::HttpConfig;
use crate::error::{DownloadError, Error, Result};
use crate::types::{DownloadType, Metadata};

/// Metadata key for the response `Content-Type`
pub const CONTENT_TYPE_METADATA_KEY: &str = "content-type";

/// Metadata key for the number of bytes written
pub const SIZE_METADATA_KEY: &str = "size-bytes";

/// Fetches a resource into a writer
///
/// Implementations must have written and flushed every byte before returning
/// `Ok`. On `Err` the destination may hold a partial body; the caller is
/// responsible for discarding it.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Stream `url` into `dest` and return result metadata
    async fn download(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata>;
}

/// Plain HTTP(S) GET downloader backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Build a downloader from the HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));

        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| {
            Error::Download(DownloadError::RequestFailed(format!(
                "Failed to create HTTP client: {}",
                e
            )))
        })?;

        Ok(Self { client })
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Download(DownloadError::Timeout)
    } else {
        Error::Download(DownloadError::RequestFailed(e.to_string()))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<Metadata> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Download(DownloadError::InvalidUrl(format!("{}: {}", url, e))))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Download(DownloadError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                parsed.scheme(),
                url
            ))));
        }

        tracing::debug!(url, "starting HTTP download");

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(request_error)? {
            dest.write_all(&chunk)
                .await
                .map_err(|e| Error::Download(DownloadError::Write(e)))?;
            written += chunk.len() as u64;
        }
        dest.flush()
            .await
            .map_err(|e| Error::Download(DownloadError::Write(e)))?;

        tracing::debug!(url, size = written, "HTTP download completed");

        let mut metadata = Metadata::new();
        metadata.insert(SIZE_METADATA_KEY.to_string(), written.into());
        if let Some(content_type) = content_type {
            metadata.insert(CONTENT_TYPE_METADATA_KEY.to_string(), content_type.into());
        }
        Ok(metadata)
    }
}

/// Downloader strategies keyed by download type
#[derive(Clone, Default)]
pub struct DownloaderRegistry {
    downloaders: HashMap<DownloadType, Arc<dyn Downloader>>,
}

impl DownloaderRegistry {
    /// Empty registry: every type is unsupported
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTTP downloader
    pub fn with_http(config: &HttpConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(DownloadType::Http, Arc::new(HttpDownloader::new(config)?));
        Ok(registry)
    }

    /// Install (or replace) the downloader for `download_type`
    pub fn register(&mut self, download_type: DownloadType, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(download_type, downloader);
    }

    /// The downloader for `download_type`, if any
    pub fn get(&self, download_type: DownloadType) -> Option<Arc<dyn Downloader>> {
        self.downloaders.get(&download_type).cloned()
    }
}

impl std::fmt::Debug for DownloaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloaderRegistry")
            .field("types", &self.downloaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
