//! Transfer session bookkeeping
//!
//! A [`TransferSession`] tracks one logical upload or download from
//! start to terminal state. It is created by the caller, mutated only
//! by the coordinator that runs it, and discarded once terminal.

use crate::chunk::{self, ChunkDescriptor};
use crate::error::Result;
use crate::state::StateKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Create a new random transfer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a transfer session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Created but not started
    Idle,
    /// Chunks are being uploaded
    Uploading,
    /// Chunks are being downloaded
    Downloading,
    /// Server-side processing after upload completion
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Aborted by the caller
    Cancelled,
}

impl TransferStatus {
    /// Check if the transfer is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the transfer is actively moving bytes
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Uploading | Self::Downloading | Self::Processing)
    }
}

/// Bookkeeping for one logical transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSession {
    /// Unique identifier
    pub id: TransferId,
    /// Target URL or storage key
    pub target: String,
    /// Name of the file being moved
    pub file_name: String,
    /// Total size in bytes
    pub total_size: u64,
    /// Chunk size in bytes
    pub chunk_size: u64,
    /// Number of chunks covering the file
    pub total_chunks: u64,
    /// Current status
    pub status: TransferStatus,
    /// Bytes transferred so far
    pub bytes_transferred: u64,
    /// When the transfer was created
    pub started_at: DateTime<Utc>,
}

impl TransferSession {
    /// Create a new idle session
    ///
    /// Fails with a configuration error when `chunk_size` is zero.
    pub fn new(
        target: impl Into<String>,
        file_name: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        // Planning up front validates chunk_size and fixes total_chunks
        let chunks = chunk::plan_chunks(total_size, chunk_size)?;
        Ok(Self {
            id: TransferId::new(),
            target: target.into(),
            file_name: file_name.into(),
            total_size,
            chunk_size,
            total_chunks: chunks.len() as u64,
            status: TransferStatus::Idle,
            bytes_transferred: 0,
            started_at: Utc::now(),
        })
    }

    /// Plan the chunk list for this session
    pub fn chunks(&self) -> Result<Vec<ChunkDescriptor>> {
        chunk::plan_chunks(self.total_size, self.chunk_size)
    }

    /// Resumable-state key for this session
    pub fn state_key(&self) -> StateKey {
        StateKey::new(&self.target, &self.file_name)
    }

    /// Completion percentage (0.0 - 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_transferred as f64 / self.total_size as f64) * 100.0
        }
    }
}
