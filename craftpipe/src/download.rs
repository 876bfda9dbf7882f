//! Verified HTTP(S) download engine, a single item primitive and a bounded-concurrency
//! batch driver built on top of it.
//!
//! Downloads are written to a temporary `.part` file next to their destination that is
//! atomically renamed once complete and verified, so a destination is either absent or
//! fully present and valid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::future::Future;
use std::collections::HashMap;
use std::sync::Arc;
use std::{fmt, io};

use bytes::Bytes;

use sha1::{Digest, Sha1};

use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::fs::{self, File};

use tracing::{debug, trace, warn};

use crate::progress::{ProgressAggregator, ProgressSink, ProgressUpdater};
use crate::serde::format_hex_bytes;
use crate::task::CancelToken;
use crate::path::PathExt;


/// Interval between two reports of a batch download progress.
pub const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Default maximum number of concurrent connections of a downloader.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Type alias for transport errors, these are opaque to the engine.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// A response to a GET request, its body is to be streamed.
#[derive(Debug)]
pub struct Response<B> {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: B,
}

/// The body of a response, streamed by chunks.
pub trait Body: Send {
    /// Return the next chunk, none when the body is complete.
    fn chunk(&mut self) -> impl Future<Output = std::result::Result<Option<Bytes>, TransportError>> + Send;
}

/// The network seam of the engine, only GET requests are needed.
pub trait Transport: Send + Sync + 'static {
    type Body: Body;
    fn get(&self, url: &str) -> impl Future<Output = std::result::Result<Response<Self::Body>, TransportError>> + Send;
}

/// The default transport, based on a reqwest client that bypass HTTP caches.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {

    pub fn new() -> reqwest::Result<Self> {
        let client = crate::http::builder()
            .default_headers(crate::http::no_cache_headers())
            .build()?;
        Ok(Self { client })
    }

    /// Create a transport from an existing client, cache bypass headers are still
    /// added to each request.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

}

impl Transport for HttpTransport {

    type Body = reqwest::Response;

    async fn get(&self, url: &str) -> std::result::Result<Response<Self::Body>, TransportError> {

        let res = self.client.get(url)
            .headers(crate::http::no_cache_headers())
            .send()
            .await?;

        Ok(Response {
            status: res.status().as_u16(),
            content_length: res.content_length(),
            body: res,
        })

    }

}

impl Body for reqwest::Response {
    async fn chunk(&mut self) -> std::result::Result<Option<Bytes>, TransportError> {
        Ok(reqwest::Response::chunk(self).await?)
    }
}

/// An item to download: the source URL, the destination file, optional expected SHA-1
/// and size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DownloadItem {
    pub url: String,
    pub file: PathBuf,
    pub sha1: Option<[u8; 20]>,
    pub size: Option<u32>,
}

impl DownloadItem {

    pub fn new(url: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            file: file.into(),
            sha1: None,
            size: None,
        }
    }

    #[inline]
    pub fn with_sha1(mut self, sha1: Option<[u8; 20]>) -> Self {
        self.sha1 = sha1;
        self
    }

    #[inline]
    pub fn with_size(mut self, size: Option<u32>) -> Self {
        self.size = size;
        self
    }

}

/// What to do when the destination of an item already exists, and is valid with
/// regard to the expected SHA-1 (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacePolicy {
    /// The existing file is deleted and downloaded again.
    Replace,
    /// The existing file is kept and reported as complete.
    #[default]
    Skip,
    /// Fail with [`Error::FileExists`].
    Fail,
}

/// The outcome of a successful single item download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The file was already present and has been kept.
    Skipped,
    /// The file has been downloaded, with its final size.
    Downloaded { size: u64 },
}

/// Service counting the bytes downloaded since its creation, shared by clones.
#[derive(Debug, Clone)]
pub struct ByteCounter {
    inner: Arc<ByteCounterInner>,
}

#[derive(Debug)]
struct ByteCounterInner {
    bytes: AtomicU64,
    start: Instant,
}

impl ByteCounter {

    pub fn new() -> Self {
        Self {
            inner: Arc::new(ByteCounterInner {
                bytes: AtomicU64::new(0),
                start: Instant::now(),
            }),
        }
    }

    #[inline]
    pub fn add(&self, bytes: u64) {
        self.inner.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes downloaded.
    #[inline]
    pub fn total(&self) -> u64 {
        self.inner.bytes.load(Ordering::Relaxed)
    }

    /// Average speed since creation, in bytes per second.
    pub fn speed(&self) -> f64 {
        let elapsed = self.inner.start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else {
            self.total() as f64 / elapsed
        }
    }

}

impl Default for ByteCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The download service, owning its transport, a FIFO-fair limiter of concurrent
/// connections shared by all batches, and a byte counter. Clones share all of these.
pub struct Downloader<T: Transport = HttpTransport> {
    transport: Arc<T>,
    limiter: Arc<Semaphore>,
    counter: ByteCounter,
}

impl<T: Transport> Clone for Downloader<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            limiter: Arc::clone(&self.limiter),
            counter: self.counter.clone(),
        }
    }
}

impl<T: Transport> fmt::Debug for Downloader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("available_connections", &self.limiter.available_permits())
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

impl Downloader<HttpTransport> {

    /// Create a downloader with the default HTTP transport.
    pub fn http() -> reqwest::Result<Self> {
        Ok(Self::new(HttpTransport::new()?))
    }

}

impl<T: Transport> Downloader<T> {

    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            limiter: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
            counter: ByteCounter::new(),
        }
    }

    /// Change the maximum number of concurrent connections, at least one.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.limiter = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Use the given counter for counting downloaded bytes.
    pub fn with_counter(mut self, counter: ByteCounter) -> Self {
        self.counter = counter;
        self
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn counter(&self) -> &ByteCounter {
        &self.counter
    }

    /// Download a single item, with the given policy if its destination exists. The
    /// given progress updater receives the fraction downloaded.
    pub async fn download(&self,
        item: &DownloadItem,
        policy: ReplacePolicy,
        progress: &ProgressUpdater,
        cancel: &CancelToken,
    ) -> Result<Outcome> {

        if self.check_existing(item, policy).await? {
            trace!(file = %item.file.display(), "skipped existing file");
            progress.set(1.0);
            return Ok(Outcome::Skipped);
        }

        if let Some(parent) = item.file.parent() {
            fs::create_dir_all(parent).await
                .map_err(|e| Error::new_io_file(e, parent))?;
        }

        let part_file = item.file.append(".part");
        let res = self.fetch(item, &part_file, progress, cancel).await;

        let size = match res {
            Ok(size) => size,
            Err(e) => {
                // Part file might not exist, if the request failed.
                let _ = fs::remove_file(&part_file).await;
                return Err(e);
            }
        };

        fs::rename(&part_file, &item.file).await
            .map_err(|e| Error::new_io(e, format!("rename: {}, to: {}", part_file.display(), item.file.display())))?;

        debug!(url = %item.url, file = %item.file.display(), size, "downloaded");
        Ok(Outcome::Downloaded { size })

    }

    /// Check the destination file if existing, returning true if the item should be
    /// skipped, the file is deleted if it should be downloaded again.
    async fn check_existing(&self, item: &DownloadItem, policy: ReplacePolicy) -> Result<bool> {

        match fs::metadata(&item.file).await {
            Ok(metadata) if metadata.is_file() => (),
            Ok(_) => return Err(Error::new_io(io::ErrorKind::IsADirectory.into(), item.file.display().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::new_io_file(e, &item.file)),
        }

        if item.sha1.is_some() || item.size.is_some() {
            let file = item.file.clone();
            let (size, sha1) = (item.size, item.sha1);
            let valid = tokio::task::spawn_blocking(move || check_file(&file, size, sha1.as_ref()))
                .await
                .map_err(|e| Error::new_io(io::Error::other(e), item.file.display().to_string()))?
                .map_err(|e| Error::new_io_file(e, &item.file))?;
            if !valid {
                debug!(file = %item.file.display(), "invalid existing file, downloading again");
                self.remove(&item.file).await?;
                return Ok(false);
            }
        }

        match policy {
            ReplacePolicy::Skip => Ok(true),
            ReplacePolicy::Replace => {
                self.remove(&item.file).await?;
                Ok(false)
            }
            ReplacePolicy::Fail => Err(Error::FileExists { file: item.file.clone() }),
        }

    }

    async fn remove(&self, file: &Path) -> Result<()> {
        fs::remove_file(file).await
            .map_err(|e| Error::new_io(e, format!("remove: {}", file.display())))
    }

    /// Fetch the item into the given part file, verifying size and SHA-1, returning
    /// the final size.
    async fn fetch(&self,
        item: &DownloadItem,
        part_file: &Path,
        progress: &ProgressUpdater,
        cancel: &CancelToken,
    ) -> Result<u64> {

        // The limiter is never closed, so acquisition can't fail.
        let _permit = tokio::select! {
            permit = self.limiter.acquire() => permit.map_err(|_| Error::Cancelled)?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let res = tokio::select! {
            res = self.transport.get(&item.url) => res
                .map_err(|e| Error::Transport { url: item.url.clone(), source: e })?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if !(200..300).contains(&res.status) {
            return Err(Error::BadStatus { url: item.url.clone(), status: res.status });
        }

        let expected = item.size.map(u64::from).or(res.content_length).unwrap_or(0);
        let mut body = res.body;

        let mut dst = File::create(part_file).await
            .map_err(|e| Error::new_io_file(e, part_file))?;

        let mut size = 0u64;
        let mut sha1 = Sha1::new();

        loop {

            let chunk = tokio::select! {
                chunk = body.chunk() => chunk
                    .map_err(|e| Error::Transport { url: item.url.clone(), source: e })?,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };

            let Some(chunk) = chunk else { break };

            dst.write_all(&chunk).await
                .map_err(|e| Error::new_io_file(e, part_file))?;
            sha1.update(&chunk);

            size += chunk.len() as u64;
            self.counter.add(chunk.len() as u64);

            // Zero expected bytes withholds progress updates.
            if expected != 0 {
                progress.set(size as f64 / expected as f64);
            }

        }

        dst.flush().await
            .map_err(|e| Error::new_io_file(e, part_file))?;
        drop(dst);

        if let Some(expected_size) = item.size {
            if expected_size as u64 != size {
                return Err(Error::SizeMismatch {
                    url: item.url.clone(),
                    file: item.file.clone(),
                    expected: expected_size as u64,
                    actual: size,
                });
            }
        }

        if let Some(expected_sha1) = &item.sha1 {
            let actual_sha1 = sha1.finalize();
            if expected_sha1 != actual_sha1.as_slice() {
                return Err(Error::ChecksumMismatch {
                    url: item.url.clone(),
                    file: item.file.clone(),
                    expected: format_hex_bytes(expected_sha1),
                    actual: format_hex_bytes(&actual_sha1),
                });
            }
        }

        progress.set(1.0);
        Ok(size)

    }

    /// Download all items with at most `limit` items in flight at once. The first
    /// failing item cancels all others and its error is returned. The progress is
    /// reported to the sink on a fixed interval, each item having the same weight.
    pub async fn download_all(&self,
        items: Vec<DownloadItem>,
        limit: usize,
        policy: ReplacePolicy,
        sink: impl ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {

        let count = items.len();
        let mut aggregator = ProgressAggregator::new(sink);

        if count == 0 {
            aggregator.stop().await;
            return Ok(());
        }

        let weight = 1.0 / count as f64;
        let mut pending = items.into_iter()
            .map(|item| (item, aggregator.create_channel(weight)))
            .collect::<Vec<_>>()
            .into_iter();

        aggregator.start(REPORT_INTERVAL);

        let batch_cancel = cancel.child();
        let mut set = JoinSet::new();
        let mut urls = HashMap::new();

        let spawn = |set: &mut JoinSet<_>, urls: &mut HashMap<_, _>, (item, progress): (DownloadItem, ProgressUpdater)| {
            let downloader = self.clone();
            let cancel = batch_cancel.clone();
            let url = item.url.clone();
            let handle = set.spawn(async move {
                downloader.download(&item, policy, &progress, &cancel).await
            });
            urls.insert(handle.id(), url);
        };

        for entry in pending.by_ref().take(limit.clamp(1, count)) {
            spawn(&mut set, &mut urls, entry);
        }

        let mut first_error = None;

        while let Some(joined) = set.join_next().await {

            let res = match joined {
                Ok(res) => res,
                Err(e) if e.is_panic() => Err(Error::Panicked {
                    url: urls.get(&e.id()).cloned().unwrap_or_default(),
                }),
                Err(_) => Err(Error::Cancelled),
            };

            match res {
                Ok(_) => {
                    if first_error.is_none()
                        && let Some(entry) = pending.next() {
                        spawn(&mut set, &mut urls, entry);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        warn!(error = %e, "download failed, cancelling batch");
                        batch_cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }

        }

        match first_error {
            Some(e) => {
                aggregator.abandon().await;
                Err(e)
            }
            None => {
                aggregator.stop().await;
                Ok(())
            }
        }

    }

}

/// Check if a file at a given path has the corresponding properties (size and/or SHA-1),
/// returning true if it is valid, false if not or if the file doesn't exist.
pub(crate) fn check_file(file: &Path, size: Option<u32>, sha1: Option<&[u8; 20]>) -> io::Result<bool> {

    let metadata = match std::fs::metadata(file) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if let Some(size) = size {
        if metadata.len() != size as u64 {
            return Ok(false);
        }
    }

    if let Some(sha1) = sha1 {
        let mut reader = std::fs::File::open(file)?;
        let mut digest = Sha1::new();
        io::copy(&mut reader, &mut digest)?;
        if digest.finalize().as_slice() != sha1 {
            return Ok(false);
        }
    }

    Ok(true)

}

/// A download failed, each variant carries enough context to be displayed.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The destination already exists and the policy forbids replacing it.
    #[error("file exists: {}", file.display())]
    FileExists {
        file: PathBuf,
    },
    /// The downloaded content doesn't match the expected SHA-1, it has been removed.
    #[error("checksum mismatch: {url}, expected: {expected}, actual: {actual}")]
    ChecksumMismatch {
        url: String,
        file: PathBuf,
        expected: String,
        actual: String,
    },
    /// The downloaded content doesn't match the expected size, it has been removed.
    #[error("size mismatch: {url}, expected: {expected}, actual: {actual}")]
    SizeMismatch {
        url: String,
        file: PathBuf,
        expected: u64,
        actual: u64,
    },
    /// The server answered with a status code outside of the success range.
    #[error("bad status code: {url}, status: {status}")]
    BadStatus {
        url: String,
        status: u16,
    },
    /// The transport failed to fetch the item.
    #[error("transport: {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("io: {error} @ {origin}")]
    Io {
        #[source]
        error: io::Error,
        origin: Box<str>,
    },
    /// The task downloading this item panicked, the batch has been cancelled.
    #[error("download panicked: {url}")]
    Panicked {
        url: String,
    },
    /// The download has been cancelled.
    #[error("cancelled")]
    Cancelled,
}

/// Type alias for a result with the download error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {

    #[inline]
    pub(crate) fn new_io(error: io::Error, origin: impl Into<Box<str>>) -> Self {
        Self::Io { error, origin: origin.into() }
    }

    #[inline]
    pub(crate) fn new_io_file(error: io::Error, file: impl AsRef<Path>) -> Self {
        Self::new_io(error, file.as_ref().display().to_string())
    }

}
