//! Engine configuration
//!
//! Configuration shared by the upload and download coordinators.

use crate::error::{Result, TransferError};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of simultaneously in-flight chunk uploads
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// Main configuration for the transfer engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: u64,

    /// Maximum simultaneously in-flight chunk uploads
    pub max_concurrency: usize,

    /// Maximum attempts per download before giving up
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt)
    pub retry_delay_ms: u64,

    /// Cap on the retry delay in milliseconds
    pub max_retry_delay_ms: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Directory for partially downloaded files
    pub spool_dir: PathBuf,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            spool_dir: std::env::temp_dir(),
            user_agent: format!("deck-transfer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TransferConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::config("chunk_size", "must be greater than 0"));
        }
        if self.max_concurrency == 0 {
            return Err(TransferError::config(
                "max_concurrency",
                "must be at least 1",
            ));
        }
        if self.max_retries == 0 {
            return Err(TransferError::config("max_retries", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(TransferError::config(
                "request_timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Per-request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            ..RetryPolicy::default()
        }
    }

    /// Build an HTTP client from this configuration
    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .user_agent(self.user_agent.clone())
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| TransferError::Internal(format!("Failed to create HTTP client: {}", e)))
    }
}
