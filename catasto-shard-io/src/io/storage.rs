//! Storage abstraction for reading remote shard files.
//!
//! This module provides the `ShardStorage` trait and the `HttpStorage`
//! implementation that range-reads files from a fixed base URL.
//!
//! # Design
//!
//! - **Range reads first**: Parquet access needs the footer and a few column
//!   chunks, never the whole file
//! - **Bounded concurrency**: every HTTP request holds a permit from a
//!   semaphore owned by the storage, so concurrent queries share one pool
//! - **Read-only**: nothing here writes to the remote host

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::error::{Result, ShardIoError};

/// Storage trait for reading shard files.
#[async_trait]
pub trait ShardStorage: Debug + Send + Sync {
    /// Read an entire file.
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Read a byte range from a file.
    ///
    /// Ranges extending past the end of the file are truncated.
    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes>;

    /// Get the size of a file in bytes.
    async fn file_size(&self, path: &str) -> Result<u64>;
}

#[async_trait]
impl<T: ShardStorage + ?Sized> ShardStorage for Arc<T> {
    async fn read(&self, path: &str) -> Result<Bytes> {
        (**self).read(path).await
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        (**self).read_range(path, range).await
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        (**self).file_size(path).await
    }
}

/// Configuration for [`HttpStorage`].
#[derive(Debug, Clone)]
pub struct HttpStorageConfig {
    /// Base URL relative paths are joined onto. Must end with `/`.
    pub base_url: String,
    /// Maximum number of HTTP requests in flight at once.
    pub max_concurrent_fetches: usize,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            max_concurrent_fetches: 2,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
        }
    }
}

/// HTTP storage using `HEAD` for sizes and `Range` requests for reads.
#[derive(Clone)]
pub struct HttpStorage {
    base_url: String,
    client: reqwest::Client,
    fetch_permits: Arc<Semaphore>,
    max_concurrent_fetches: usize,
}

impl Debug for HttpStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStorage")
            .field("base_url", &self.base_url)
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .finish()
    }
}

impl HttpStorage {
    /// Create a new HTTP storage.
    pub fn new(config: HttpStorageConfig) -> Result<Self> {
        if config.max_concurrent_fetches == 0 {
            return Err(ShardIoError::config(
                "max_concurrent_fetches must be at least 1",
            ));
        }
        if !config.base_url.is_empty() && !config.base_url.ends_with('/') {
            return Err(ShardIoError::config(format!(
                "base URL must end with '/': {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(config.max_concurrent_fetches)
            .build()
            .map_err(|e| ShardIoError::http(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            base_url = %config.base_url,
            max_concurrent_fetches = config.max_concurrent_fetches,
            "HTTP shard storage ready"
        );

        Ok(Self {
            base_url: config.base_url,
            client,
            fetch_permits: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            max_concurrent_fetches: config.max_concurrent_fetches,
        })
    }

    /// Number of fetch permits currently free.
    pub fn available_permits(&self) -> usize {
        self.fetch_permits.available_permits()
    }

    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches
    }

    /// Resolve a storage path to a URL. Absolute URLs pass through unchanged.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.fetch_permits
            .acquire()
            .await
            .map_err(|_| ShardIoError::storage("Fetch pool closed"))
    }

    fn check_status(url: &str, status: StatusCode) -> Result<()> {
        if status == StatusCode::NOT_FOUND {
            return Err(ShardIoError::not_found(url.to_string()));
        }
        if !status.is_success() {
            return Err(ShardIoError::http(format!(
                "Request to {} failed with status {}",
                url, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShardStorage for HttpStorage {
    async fn read(&self, path: &str) -> Result<Bytes> {
        let url = self.url_for(path);
        let _permit = self.acquire().await?;

        let response = self.client.get(&url).send().await?;
        Self::check_status(&url, response.status())?;
        Ok(response.bytes().await?)
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        let url = self.url_for(path);
        let range_header = format!("bytes={}-{}", range.start, range.end - 1);
        let _permit = self.acquire().await?;

        tracing::trace!(url = %url, range = %range_header, "Range request");

        let response = self
            .client
            .get(&url)
            .header(RANGE, range_header)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        Self::check_status(&url, status)?;

        let body = response.bytes().await?;
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(body);
        }

        // Server ignored the Range header and sent the whole file.
        tracing::warn!(url = %url, "Server ignored Range header, slicing full body");
        let start = (range.start as usize).min(body.len());
        let end = (range.end as usize).min(body.len());
        Ok(body.slice(start..end))
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        let url = self.url_for(path);
        let _permit = self.acquire().await?;

        let response = self.client.head(&url).send().await?;
        Self::check_status(&url, response.status())?;

        // Read the header directly: the body of a HEAD response is empty, so
        // the body size hint is not the file size.
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| ShardIoError::http(format!("No content-length in HEAD response for {}", url)))
    }
}

/// In-memory storage for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: HashMap<String, Bytes>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the storage.
    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<Bytes>) {
        self.files.insert(path.into(), content.into());
    }

    fn get(&self, path: &str) -> Result<&Bytes> {
        self.files
            .get(path)
            .ok_or_else(|| ShardIoError::not_found(path.to_string()))
    }
}

#[async_trait]
impl ShardStorage for MemoryStorage {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.get(path).cloned()
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        let content = self.get(path)?;

        let start = range.start as usize;
        let end = (range.end as usize).min(content.len());

        if start >= end {
            return Ok(Bytes::new());
        }

        Ok(content.slice(start..end))
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        self.get(path).map(|c| c.len() as u64)
    }
}

/// A storage wrapper that counts calls.
///
/// Used in tests to check that readers stick to range reads and that cached
/// footers are not fetched twice.
#[derive(Debug)]
pub struct CountingStorage<S> {
    inner: S,
    read_calls: AtomicUsize,
    range_read_calls: AtomicUsize,
    size_calls: AtomicUsize,
}

impl<S: ShardStorage> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            read_calls: AtomicUsize::new(0),
            range_read_calls: AtomicUsize::new(0),
            size_calls: AtomicUsize::new(0),
        }
    }

    /// Number of whole-file `read()` calls.
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn range_read_calls(&self) -> usize {
        self.range_read_calls.load(Ordering::SeqCst)
    }

    pub fn size_calls(&self) -> usize {
        self.size_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: ShardStorage> ShardStorage for CountingStorage<S> {
    async fn read(&self, path: &str) -> Result<Bytes> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read(path).await
    }

    async fn read_range(&self, path: &str, range: Range<u64>) -> Result<Bytes> {
        self.range_read_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.read_range(path, range).await
    }

    async fn file_size(&self, path: &str) -> Result<u64> {
        self.size_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.file_size(path).await
    }
}
