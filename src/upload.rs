//! Upload path
//!
//! Drives chunk uploads against an external init/chunk/complete/cancel
//! RPC with a bounded sliding window: at most `max_concurrency` chunk
//! operations are in flight at once, and a free slot is refilled as
//! soon as any of them settles.
//!
//! A failed chunk is fatal for the whole session — the server cannot
//! resume a partial chunk set, so the coordinator cancels the upload
//! instead of retrying individual chunks.

use crate::chunk::ChunkState;
use crate::config::{TransferConfig, DEFAULT_MAX_CONCURRENCY};
use crate::error::{Result, TransferError};
use crate::progress::{ProgressTracker, TransferProgress};
use crate::session::{TransferSession, TransferStatus};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Server response to an upload initiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadHandshake {
    /// Server-assigned upload identifier
    pub upload_id: String,
    /// Chunk size the server expects
    pub chunk_size: u64,
    /// Number of chunks the server expects
    pub total_chunks: u64,
}

/// Server acknowledgement of one received chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReceipt {
    /// Bytes the server accepted for this chunk
    pub bytes_received: u64,
}

/// Final result of a completed upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Where the assembled file was stored
    #[serde(default)]
    pub location: Option<String>,
}

/// External upload RPC
///
/// `send_chunk` is idempotent per index: re-sending a chunk overwrites
/// the previous copy. `cancel` releases server-side resources and may
/// be called more than once.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Initiate an upload, returning the server's chunking decision
    async fn init(&self, file_name: &str, file_size: u64) -> Result<UploadHandshake>;

    /// Send one chunk
    async fn send_chunk(&self, upload_id: &str, index: u32, data: Bytes) -> Result<ChunkReceipt>;

    /// Finalize the upload after all chunks are sent
    async fn complete(&self, upload_id: &str) -> Result<UploadReceipt>;

    /// Abort the upload and release server-side resources
    async fn cancel(&self, upload_id: &str) -> Result<()>;
}

/// HTTP implementation of the upload RPC
///
/// Endpoints relative to the base URL:
/// - `POST uploads` with a JSON body `{file_name, file_size}`
/// - `POST uploads/{id}/chunks/{index}` with the raw chunk bytes
/// - `POST uploads/{id}/complete`
/// - `POST uploads/{id}/cancel`
pub struct HttpUploadTransport {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: std::time::Duration,
}

#[derive(Serialize)]
struct InitRequest<'a> {
    file_name: &'a str,
    file_size: u64,
}

impl HttpUploadTransport {
    /// Create a transport rooted at `base_url`
    pub fn new(base_url: &str, config: &TransferConfig) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Relative joins below need a directory-style base
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: config.http_client()?,
            base_url,
            request_timeout: config.request_timeout(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| TransferError::config("url", e.to_string()))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::server(
                status.as_u16(),
                format!("upload endpoint returned {}", status),
            ));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn init(&self, file_name: &str, file_size: u64) -> Result<UploadHandshake> {
        let response = self
            .client
            .post(self.endpoint("uploads")?)
            .timeout(self.request_timeout)
            .json(&InitRequest {
                file_name,
                file_size,
            })
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send_chunk(&self, upload_id: &str, index: u32, data: Bytes) -> Result<ChunkReceipt> {
        let url = self.endpoint(&format!("uploads/{}/chunks/{}", upload_id, index))?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn complete(&self, upload_id: &str) -> Result<UploadReceipt> {
        let url = self.endpoint(&format!("uploads/{}/complete", upload_id))?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn cancel(&self, upload_id: &str) -> Result<()> {
        let url = self.endpoint(&format!("uploads/{}/cancel", upload_id))?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::server(
                status.as_u16(),
                format!("cancel returned {}", status),
            ));
        }
        Ok(())
    }
}

/// Bounded-concurrency upload coordinator
pub struct UploadCoordinator<T: UploadTransport + 'static> {
    transport: Arc<T>,
    max_concurrency: usize,
}

impl<T: UploadTransport + 'static> UploadCoordinator<T> {
    /// Create a coordinator with the default window of 3
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_concurrency(transport, DEFAULT_MAX_CONCURRENCY)
    }

    /// Create a coordinator with an explicit window size
    pub fn with_concurrency(transport: Arc<T>, max_concurrency: usize) -> Self {
        Self {
            transport,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Upload `data` as the session's file, driving every chunk to
    /// completion or the first fatal failure
    ///
    /// On success the session is `Completed` and the server's final
    /// receipt is returned. On any chunk failure the upload is
    /// cancelled server-side and the error surfaces; a fired
    /// cancellation token aborts in-flight chunk requests as well as
    /// pending ones.
    pub async fn run<F>(
        &self,
        session: &mut TransferSession,
        data: Bytes,
        cancel: CancellationToken,
        on_progress: F,
    ) -> Result<UploadReceipt>
    where
        F: Fn(TransferProgress) + Send + Sync + 'static,
    {
        if data.len() as u64 != session.total_size {
            return Err(TransferError::config(
                "data",
                format!(
                    "data is {} bytes but session expects {}",
                    data.len(),
                    session.total_size
                ),
            ));
        }

        session.status = TransferStatus::Uploading;

        let handshake = tokio::select! {
            r = self
                .transport
                .init(&session.file_name, session.total_size) => r,
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
        };
        let handshake = match handshake {
            Ok(h) => h,
            Err(e) => {
                session.status = terminal_status(&e);
                return Err(e);
            }
        };

        // The server owns the chunking decision
        if handshake.chunk_size > 0 && handshake.chunk_size != session.chunk_size {
            session.chunk_size = handshake.chunk_size;
        }
        let mut chunks = match session.chunks() {
            Ok(c) => c,
            Err(e) => {
                session.status = TransferStatus::Failed;
                self.cancel_upload(&handshake.upload_id).await;
                return Err(e);
            }
        };
        session.total_chunks = chunks.len() as u64;

        if handshake.total_chunks != chunks.len() as u64 {
            session.status = TransferStatus::Failed;
            self.cancel_upload(&handshake.upload_id).await;
            return Err(TransferError::Assembly(format!(
                "server expects {} chunks, planned {}",
                handshake.total_chunks,
                chunks.len()
            )));
        }

        let tracker = Arc::new(ProgressTracker::new(Some(session.total_size)));
        let on_progress = Arc::new(on_progress);

        // Zero-byte file: nothing to send, finalize right away
        if chunks.is_empty() {
            return self
                .finalize(session, &handshake.upload_id, &cancel, &tracker, on_progress.as_ref())
                .await;
        }

        let uploaded = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        // Child token lets an internal failure stop the window without
        // affecting the caller's token
        let token = cancel.child_token();

        let mut tasks: JoinSet<std::result::Result<(u32, u64), (u32, TransferError)>> =
            JoinSet::new();

        for descriptor in &chunks {
            let index = descriptor.index;
            let range = descriptor.start as usize..descriptor.end as usize;
            let data = data.slice(range);
            let transport = Arc::clone(&self.transport);
            let upload_id = handshake.upload_id.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let uploaded = Arc::clone(&uploaded);
            let tracker = Arc::clone(&tracker);
            let on_progress = Arc::clone(&on_progress);

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| (index, TransferError::Cancelled))?;

                if token.is_cancelled() {
                    return Err((index, TransferError::Cancelled));
                }

                let receipt = tokio::select! {
                    r = transport.send_chunk(&upload_id, index, data) => {
                        r.map_err(|e| (index, e))?
                    }
                    _ = token.cancelled() => return Err((index, TransferError::Cancelled)),
                };

                let total =
                    uploaded.fetch_add(receipt.bytes_received, Ordering::Relaxed)
                        + receipt.bytes_received;
                on_progress(tracker.record(total));

                Ok((index, receipt.bytes_received))
            });
        }

        let mut first_error: Option<TransferError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, _bytes))) => {
                    chunks[index as usize].state = ChunkState::Done;
                }
                Ok(Err((index, error))) => {
                    chunks[index as usize].state = ChunkState::Failed;
                    if first_error.is_none() {
                        tracing::error!(chunk = index, %error, "chunk upload failed");
                        first_error = Some(error);
                        // Stop dispatching further chunks
                        token.cancel();
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(TransferError::Internal(format!(
                            "chunk task panicked: {}",
                            join_error
                        )));
                        token.cancel();
                    }
                }
            }
        }

        session.bytes_transferred = uploaded.load(Ordering::Relaxed);

        if cancel.is_cancelled() {
            self.cancel_upload(&handshake.upload_id).await;
            session.status = TransferStatus::Cancelled;
            return Err(TransferError::Cancelled);
        }

        if let Some(error) = first_error {
            self.cancel_upload(&handshake.upload_id).await;
            session.status = TransferStatus::Failed;
            return Err(error);
        }

        if session.bytes_transferred != session.total_size {
            self.cancel_upload(&handshake.upload_id).await;
            session.status = TransferStatus::Failed;
            return Err(TransferError::Assembly(format!(
                "server acknowledged {} of {} bytes",
                session.bytes_transferred, session.total_size
            )));
        }

        self.finalize(session, &handshake.upload_id, &cancel, &tracker, on_progress.as_ref())
            .await
    }

    /// Finalize a fully transferred upload
    async fn finalize<F>(
        &self,
        session: &mut TransferSession,
        upload_id: &str,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
        on_progress: &F,
    ) -> Result<UploadReceipt>
    where
        F: Fn(TransferProgress) + Send + Sync + 'static,
    {
        session.status = TransferStatus::Processing;

        let receipt = tokio::select! {
            r = self.transport.complete(upload_id) => r,
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
        };

        match receipt {
            Ok(receipt) => {
                session.status = TransferStatus::Completed;
                on_progress(tracker.record(session.total_size));
                tracing::debug!(id = %session.id, "upload completed");
                Ok(receipt)
            }
            Err(e) => {
                self.cancel_upload(upload_id).await;
                session.status = terminal_status(&e);
                Err(e)
            }
        }
    }

    /// Best-effort server-side cleanup; cancel is idempotent
    async fn cancel_upload(&self, upload_id: &str) {
        if let Err(e) = self.transport.cancel(upload_id).await {
            tracing::warn!(upload_id, %e, "failed to cancel upload");
        }
    }
}

fn terminal_status(error: &TransferError) -> TransferStatus {
    if matches!(error, TransferError::Cancelled) {
        TransferStatus::Cancelled
    } else {
        TransferStatus::Failed
    }
}
