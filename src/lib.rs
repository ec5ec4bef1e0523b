//! # deck-transfer
//!
//! A chunked, resumable transfer engine for moving large presentation
//! files over unreliable networks.
//!
//! ## Features
//!
//! - **Chunked uploads**: bounded sliding-window scheduling against an
//!   init/chunk/complete/cancel RPC, with atomic progress aggregation
//! - **Resumable downloads**: ranged requests with persisted chunk
//!   state, so a failed transfer continues where it stopped
//! - **Retry with backoff**: transient failures retried with
//!   exponential delays; fatal ones surface immediately
//! - **Cancellation**: a fired token aborts in-flight requests, not
//!   just pending ones
//! - **Async**: built on Tokio; no OS threads per transfer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deck_transfer::{
//!     DownloadOptions, Downloader, MemoryStateStore, TransferConfig,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TransferConfig::default();
//!     let downloader = Downloader::new(&config, Arc::new(MemoryStateStore::new()))?;
//!
//!     let outcome = downloader
//!         .download_with_retry(
//!             "https://files.example.com/decks/quarterly.pptx",
//!             "quarterly.pptx",
//!             &DownloadOptions::default(),
//!             &CancellationToken::new(),
//!             |progress| println!("{:.1}%", progress.percentage),
//!             |attempt, error| eprintln!("attempt {} failed: {}", attempt, error),
//!         )
//!         .await?;
//!
//!     if outcome.success {
//!         println!("downloaded {} bytes", outcome.bytes_downloaded);
//!     }
//!     Ok(())
//! }
//! ```

// Modules
pub mod chunk;
pub mod config;
pub mod download;
pub mod error;
pub mod progress;
pub mod retry;
pub mod session;
pub mod state;
pub mod upload;

// Re-exports for convenience
pub use chunk::{plan_chunks, total_chunks, ChunkDescriptor, ChunkState};
pub use config::{TransferConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY};
pub use download::{DownloadOptions, DownloadOutcome, Downloader};
pub use error::{NetworkErrorKind, Result, TransferError};
pub use progress::{ProgressTracker, TransferProgress};
pub use retry::{RetryContext, RetryPolicy};
pub use session::{TransferId, TransferSession, TransferStatus};

// State store exports
pub use state::{MemoryStateStore, ResumableState, SqliteStateStore, StateKey, StateStore};

// Upload exports
pub use upload::{
    ChunkReceipt, HttpUploadTransport, UploadCoordinator, UploadHandshake, UploadReceipt,
    UploadTransport,
};
