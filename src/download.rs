//! Download path
//!
//! Two modes share one retry/backoff loop:
//!
//! - **Whole-body streaming**: a single GET whose body is accumulated
//!   with per-read progress. Used when the file size is unknown or the
//!   caller does not need resumability.
//! - **Resumable ranged**: the file is fetched chunk by chunk with
//!   `Range` requests, each completed chunk written to a spool file at
//!   its offset and recorded in the injected [`StateStore`]. A later
//!   attempt requests only the missing chunks. Chunks are fetched
//!   sequentially; assembly is by chunk index, not completion order.
//!
//! Expected failures never panic and never surface as `Err`: the
//! coordinator returns a [`DownloadOutcome`] carrying the attempt count
//! and byte progress. Only invalid configuration is an `Err`.

use crate::chunk::{self, ChunkDescriptor, ChunkState};
use crate::config::{TransferConfig, DEFAULT_CHUNK_SIZE};
use crate::error::{NetworkErrorKind, Result, TransferError};
use crate::progress::{ProgressTracker, TransferProgress};
use crate::retry::{RetryContext, RetryPolicy};
use crate::state::{ResumableState, StateKey, StateStore};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Options for a single download
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Maximum attempts before giving up
    pub max_retries: u32,
    /// Delay before the second attempt; doubles per attempt
    pub retry_delay: Duration,
    /// Timeout applied to each network call
    pub timeout: Duration,
    /// Fetch with ranged requests and persist progress
    pub resumable: bool,
    /// Known file size; required in resumable mode
    pub file_size: Option<u64>,
    /// Chunk size for resumable mode
    pub chunk_size: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            timeout: Duration::from_secs(300),
            resumable: false,
            file_size: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Result of a download, successful or not
///
/// On failure, `attempts` and `bytes_downloaded` let the caller render
/// partial progress ("3 of 5 chunks, retrying...").
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Whether the download completed
    pub success: bool,
    /// The assembled file, present on success
    pub data: Option<Bytes>,
    /// The final error, present on failure
    pub error: Option<TransferError>,
    /// Number of attempts made
    pub attempts: u32,
    /// Bytes successfully received
    pub bytes_downloaded: u64,
}

impl DownloadOutcome {
    fn succeeded(data: Bytes, attempts: u32) -> Self {
        let bytes_downloaded = data.len() as u64;
        Self {
            success: true,
            data: Some(data),
            error: None,
            attempts,
            bytes_downloaded,
        }
    }

    fn failed(error: TransferError, attempts: u32, bytes_downloaded: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            attempts,
            bytes_downloaded,
        }
    }
}

/// Retry-aware HTTP download coordinator
pub struct Downloader {
    client: Client,
    store: Arc<dyn StateStore>,
    policy: RetryPolicy,
    spool_dir: PathBuf,
}

impl Downloader {
    /// Create a downloader with an injected resumable state store
    pub fn new(config: &TransferConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: config.http_client()?,
            store,
            policy: config.retry_policy(),
            spool_dir: config.spool_dir.clone(),
        })
    }

    /// Download `url`, retrying transient failures with exponential
    /// backoff
    ///
    /// Expected failures are reported through the returned
    /// [`DownloadOutcome`]; `Err` is reserved for invalid configuration.
    /// `on_retry` fires before each backoff wait with the attempt number
    /// that just failed.
    pub async fn download_with_retry<F, R>(
        &self,
        url: &str,
        file_name: &str,
        options: &DownloadOptions,
        cancel: &CancellationToken,
        on_progress: F,
        on_retry: R,
    ) -> Result<DownloadOutcome>
    where
        F: Fn(TransferProgress) + Send + Sync,
        R: Fn(u32, &TransferError) + Send + Sync,
    {
        let url = Url::parse(url)?;
        if options.max_retries == 0 {
            return Err(TransferError::config("max_retries", "must be at least 1"));
        }
        if options.resumable {
            if options.file_size.is_none() {
                return Err(TransferError::config(
                    "file_size",
                    "required for resumable downloads",
                ));
            }
            if options.chunk_size == 0 {
                return Err(TransferError::config("chunk_size", "must be greater than 0"));
            }
            // Fail on hostile file names before touching the spool dir
            self.part_path(file_name)?;
        }

        let policy = RetryPolicy {
            max_retries: options.max_retries,
            base_delay: options.retry_delay,
            ..self.policy.clone()
        };
        let key = StateKey::new(url.as_str(), file_name);
        let bytes_seen = AtomicU64::new(0);
        let mut ctx = RetryContext::new();

        loop {
            if cancel.is_cancelled() {
                return Ok(DownloadOutcome::failed(
                    TransferError::Cancelled,
                    ctx.attempt() - 1,
                    bytes_seen.load(Ordering::Relaxed),
                ));
            }

            let result = if options.resumable {
                self.attempt_resumable(&url, file_name, &key, options, cancel, &on_progress, &bytes_seen)
                    .await
            } else {
                self.attempt_whole_body(&url, options, cancel, &on_progress, &bytes_seen)
                    .await
            };

            match result {
                Ok(data) => {
                    if options.resumable {
                        if let Err(e) = self.store.delete(&key).await {
                            tracing::warn!(%e, "failed to clear resumable state");
                        }
                    }
                    tracing::debug!(
                        %url,
                        attempts = ctx.attempt(),
                        bytes = data.len(),
                        "download completed"
                    );
                    return Ok(DownloadOutcome::succeeded(data, ctx.attempt()));
                }
                Err(error) => {
                    let bytes = bytes_seen.load(Ordering::Relaxed);
                    if matches!(error, TransferError::Cancelled) {
                        return Ok(DownloadOutcome::failed(error, ctx.attempt(), bytes));
                    }
                    if !policy.should_retry(ctx.attempt(), &error) {
                        return Ok(DownloadOutcome::failed(error, ctx.attempt(), bytes));
                    }

                    on_retry(ctx.attempt(), &error);
                    let delay = policy.delay_for_attempt(ctx.attempt());
                    tracing::debug!(
                        attempt = ctx.attempt(),
                        ?delay,
                        %error,
                        "download attempt failed, retrying"
                    );
                    ctx.record_failure(error, delay);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            return Ok(DownloadOutcome::failed(
                                TransferError::Cancelled,
                                ctx.attempt() - 1,
                                bytes_seen.load(Ordering::Relaxed),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Single whole-body streaming attempt
    #[allow(clippy::too_many_arguments)]
    async fn attempt_whole_body<F>(
        &self,
        url: &Url,
        options: &DownloadOptions,
        cancel: &CancellationToken,
        on_progress: &F,
        bytes_seen: &AtomicU64,
    ) -> Result<Bytes>
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        let fetch = async {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::server(
                    status.as_u16(),
                    format!("GET returned {}", status),
                ));
            }

            let total = response.content_length();
            let tracker = ProgressTracker::new(total);
            let mut body = BytesMut::new();
            let mut stream = response.bytes_stream();

            while let Some(next) = tokio::select! {
                n = stream.next() => n,
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            } {
                let piece = next?;
                body.extend_from_slice(&piece);
                bytes_seen.store(body.len() as u64, Ordering::Relaxed);
                on_progress(tracker.record(body.len() as u64));
            }

            if let Some(expected) = total {
                if (body.len() as u64) < expected {
                    return Err(TransferError::network(
                        NetworkErrorKind::ConnectionReset,
                        format!("body truncated at {} of {} bytes", body.len(), expected),
                    ));
                }
            }

            Ok(body.freeze())
        };

        match tokio::time::timeout(options.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::timeout(format!(
                "request exceeded {:?}",
                options.timeout
            ))),
        }
    }

    /// Single resumable ranged attempt
    ///
    /// Fetches the chunks missing from persisted state, sequentially.
    /// On the first chunk failure the state written so far stays behind
    /// for the next attempt.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_resumable<F>(
        &self,
        url: &Url,
        file_name: &str,
        key: &StateKey,
        options: &DownloadOptions,
        cancel: &CancellationToken,
        on_progress: &F,
        bytes_seen: &AtomicU64,
    ) -> Result<Bytes>
    where
        F: Fn(TransferProgress) + Send + Sync,
    {
        let file_size = options
            .file_size
            .ok_or_else(|| TransferError::config("file_size", "required for resumable downloads"))?;
        let mut chunks = chunk::plan_chunks(file_size, options.chunk_size)?;
        if chunks.is_empty() {
            return Ok(Bytes::new());
        }
        let tracker = ProgressTracker::new(Some(file_size));
        let part_path = self.part_path(file_name)?;

        let mut state = self
            .load_state(url, key, &chunks, file_size, options.timeout, cancel)
            .await?;

        // Persisted indices are only as good as the spool file backing them
        let spool_intact = match tokio::fs::metadata(&part_path).await {
            Ok(meta) => meta.len() == file_size,
            Err(_) => false,
        };
        if !state.downloaded_chunks.is_empty() && !spool_intact {
            tracing::warn!(path = %part_path.display(), "spool file missing or resized, restarting");
            let _ = self.store.delete(key).await;
            state = ResumableState::new(chunks.len() as u64, file_size);
        }

        let mut file = self.open_spool(&part_path, file_size, spool_intact).await?;

        let mut done_bytes: u64 = chunks
            .iter()
            .filter(|c| state.is_done(c.index))
            .map(ChunkDescriptor::size)
            .sum();
        bytes_seen.store(done_bytes, Ordering::Relaxed);

        for descriptor in &mut chunks {
            if state.is_done(descriptor.index) {
                descriptor.state = ChunkState::Done;
                continue;
            }
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            descriptor.state = ChunkState::InFlight;
            let (data, etag, last_modified) = match self
                .fetch_chunk(url, descriptor, file_size, options.timeout, cancel)
                .await
            {
                Ok(fetched) => fetched,
                Err(error) => {
                    descriptor.state = ChunkState::Failed;
                    descriptor.retry_count += 1;
                    return Err(error);
                }
            };

            // Record validators from the first response we see
            if state.etag.is_none() && state.last_modified.is_none() {
                state.etag = etag;
                state.last_modified = last_modified;
            }

            file.seek(SeekFrom::Start(descriptor.start))
                .await
                .map_err(|e| TransferError::storage_write(&part_path, e.to_string()))?;
            file.write_all(&data)
                .await
                .map_err(|e| TransferError::storage_write(&part_path, e.to_string()))?;

            descriptor.state = ChunkState::Done;
            state.mark_done(descriptor.index);
            done_bytes += descriptor.size();
            bytes_seen.store(done_bytes, Ordering::Relaxed);

            if let Err(e) = self.store.set(key, &state).await {
                tracing::warn!(%e, "failed to persist resumable state");
            }
            on_progress(tracker.record(done_bytes));
        }

        file.flush()
            .await
            .map_err(|e| TransferError::storage_write(&part_path, e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| TransferError::storage_write(&part_path, e.to_string()))?;
        drop(file);

        if !state.is_complete() {
            return Err(TransferError::Assembly(format!(
                "{} of {} chunks fetched",
                state.downloaded_chunks.len(),
                state.total_chunks
            )));
        }

        let data = tokio::fs::read(&part_path)
            .await
            .map_err(|e| TransferError::storage_write(&part_path, e.to_string()))?;
        if data.len() as u64 != file_size {
            return Err(TransferError::Assembly(format!(
                "assembled {} bytes, expected {}",
                data.len(),
                file_size
            )));
        }

        if let Err(e) = tokio::fs::remove_file(&part_path).await {
            tracing::warn!(path = %part_path.display(), %e, "failed to remove spool file");
        }

        Ok(Bytes::from(data))
    }

    /// Load persisted state, revalidating it against the live resource
    ///
    /// Saved chunk indices are trusted only when the remote validators
    /// still match; a changed or unverifiable resource restarts from
    /// scratch rather than assembling a corrupt file.
    async fn load_state(
        &self,
        url: &Url,
        key: &StateKey,
        chunks: &[ChunkDescriptor],
        file_size: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ResumableState> {
        let fresh = || ResumableState::new(chunks.len() as u64, file_size);

        let saved = match self.store.get(key).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(%e, "state store read failed, starting fresh");
                return Ok(fresh());
            }
        };
        let Some(saved) = saved else {
            return Ok(fresh());
        };

        if saved.total_chunks != chunks.len() as u64 || saved.file_size != file_size {
            let _ = self.store.delete(key).await;
            return Ok(fresh());
        }

        match self.probe_validators(url, timeout, cancel).await {
            Ok((etag, last_modified)) => {
                if saved.matches_validators(etag.as_deref(), last_modified.as_deref()) {
                    tracing::debug!(
                        done = saved.downloaded_chunks.len(),
                        total = saved.total_chunks,
                        "resuming from persisted state"
                    );
                    Ok(saved)
                } else {
                    tracing::warn!(%url, "remote file changed since last attempt, restarting");
                    let _ = self.store.delete(key).await;
                    Ok(fresh())
                }
            }
            Err(TransferError::Cancelled) => Err(TransferError::Cancelled),
            Err(e) => {
                tracing::warn!(%e, "validator probe failed, discarding persisted state");
                let _ = self.store.delete(key).await;
                Ok(fresh())
            }
        }
    }

    /// Fetch one chunk with a `Range` request
    async fn fetch_chunk(
        &self,
        url: &Url,
        descriptor: &ChunkDescriptor,
        file_size: u64,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Bytes, Option<String>, Option<String>)> {
        let fetch = async {
            let response = self
                .client
                .get(url.clone())
                .header("Range", descriptor.range_header())
                .send()
                .await?;

            let status = response.status();
            if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
                return Err(TransferError::server(
                    status.as_u16(),
                    format!("chunk {} returned {}", descriptor.index, status),
                ));
            }

            let etag = header_value(&response, "etag");
            let last_modified = header_value(&response, "last-modified");

            let body = response.bytes().await?;

            // A server that ignores Range answers 200 with the full body
            let data = if status == StatusCode::OK
                && body.len() as u64 == file_size
                && descriptor.size() != file_size
            {
                body.slice(descriptor.start as usize..descriptor.end as usize)
            } else {
                body
            };

            if data.len() as u64 != descriptor.size() {
                return Err(TransferError::Network {
                    kind: NetworkErrorKind::Other,
                    message: format!(
                        "chunk {} returned {} bytes, expected {}",
                        descriptor.index,
                        data.len(),
                        descriptor.size()
                    ),
                    retryable: true,
                });
            }

            Ok((data, etag, last_modified))
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, fetch) => match result {
                Ok(r) => r,
                Err(_) => Err(TransferError::timeout(format!(
                    "chunk {} exceeded {:?}",
                    descriptor.index, timeout
                ))),
            },
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
        }
    }

    /// HEAD probe for the resource's current validators
    async fn probe_validators(
        &self,
        url: &Url,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, Option<String>)> {
        let probe = async {
            let response = self.client.head(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransferError::server(
                    status.as_u16(),
                    format!("HEAD returned {}", status),
                ));
            }
            Ok((
                header_value(&response, "etag"),
                header_value(&response, "last-modified"),
            ))
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, probe) => match result {
                Ok(r) => r,
                Err(_) => Err(TransferError::timeout("validator probe timed out")),
            },
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
        }
    }

    /// Open the spool file, preallocating it on first use
    async fn open_spool(&self, part_path: &Path, file_size: u64, reuse: bool) -> Result<File> {
        if reuse {
            return OpenOptions::new()
                .read(true)
                .write(true)
                .open(part_path)
                .await
                .map_err(|e| TransferError::storage_write(part_path, e.to_string()));
        }

        if let Some(parent) = part_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::storage_write(parent, e.to_string()))?;
        }
        let file = File::create(part_path)
            .await
            .map_err(|e| TransferError::storage_write(part_path, e.to_string()))?;
        file.set_len(file_size)
            .await
            .map_err(|e| TransferError::storage_write(part_path, e.to_string()))?;
        Ok(file)
    }

    /// Spool path for a file name, rejecting path traversal
    fn part_path(&self, file_name: &str) -> Result<PathBuf> {
        if file_name.is_empty() {
            return Err(TransferError::config("file_name", "must not be empty"));
        }
        for component in Path::new(file_name).components() {
            match component {
                Component::ParentDir => {
                    return Err(TransferError::storage_write(
                        file_name,
                        "file name contains parent directory reference",
                    ));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(TransferError::storage_write(
                        file_name,
                        "file name contains absolute path",
                    ));
                }
                _ => {}
            }
        }
        Ok(self.spool_dir.join(format!("{}.part", file_name)))
    }
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    fn downloader() -> Downloader {
        let config = TransferConfig::default();
        Downloader::new(&config, Arc::new(MemoryStateStore::new())).unwrap()
    }

    #[test]
    fn default_options_match_documented_values() {
        let options = DownloadOptions::default();
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_delay, Duration::from_millis(1000));
        assert_eq!(options.timeout, Duration::from_secs(300));
        assert!(!options.resumable);
    }

    #[test]
    fn part_path_appends_part_extension() {
        let d = downloader();
        let path = d.part_path("deck.pptx").unwrap();
        assert!(path.ends_with("deck.pptx.part"));
    }

    #[test]
    fn part_path_rejects_traversal() {
        let d = downloader();
        assert!(d.part_path("../../etc/passwd").is_err());
        assert!(d.part_path("/etc/passwd").is_err());
        assert!(d.part_path("").is_err());
        assert!(d.part_path("nested/deck.pptx").is_ok());
    }

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let d = downloader();
        let err = d
            .download_with_retry(
                "not a url",
                "deck.pptx",
                &DownloadOptions::default(),
                &CancellationToken::new(),
                |_| {},
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Config { field: "url", .. }));
    }

    #[tokio::test]
    async fn resumable_without_file_size_is_a_config_error() {
        let d = downloader();
        let options = DownloadOptions {
            resumable: true,
            ..Default::default()
        };
        let err = d
            .download_with_retry(
                "https://files.example.com/deck.pptx",
                "deck.pptx",
                &options,
                &CancellationToken::new(),
                |_| {},
                |_, _| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Config {
                field: "file_size",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn pre_cancelled_token_makes_no_attempts() {
        let d = downloader();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = d
            .download_with_retry(
                "https://files.example.com/deck.pptx",
                "deck.pptx",
                &DownloadOptions::default(),
                &cancel,
                |_| {},
                |_, _| {},
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(outcome.error, Some(TransferError::Cancelled)));
    }
}
