//! Resumable state persistence
//!
//! Tracks which chunks of a download have completed so a later attempt
//! can skip them. The store is an injected dependency: the in-memory
//! implementation covers single-process retries, the SQLite
//! implementation survives process restarts.

pub mod sqlite;

pub use sqlite::SqliteStateStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Key identifying one resumable transfer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Target URL or storage key
    pub target: String,
    /// File name within the target
    pub file_name: String,
}

impl StateKey {
    /// Create a key from target and file name
    pub fn new(target: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            file_name: file_name.into(),
        }
    }

    /// Flattened form used as a primary key by durable stores
    pub fn composite(&self) -> String {
        format!("{}::{}", self.target, self.file_name)
    }
}

/// Persisted progress of a partially completed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableState {
    /// Indices of chunks fetched successfully
    pub downloaded_chunks: BTreeSet<u32>,
    /// Number of chunks covering the file
    pub total_chunks: u64,
    /// Total file size in bytes
    pub file_size: u64,
    /// ETag observed when the first chunk was fetched
    pub etag: Option<String>,
    /// Last-Modified observed when the first chunk was fetched
    pub last_modified: Option<String>,
}

impl ResumableState {
    /// Create empty state for a download of known shape
    pub fn new(total_chunks: u64, file_size: u64) -> Self {
        Self {
            downloaded_chunks: BTreeSet::new(),
            total_chunks,
            file_size,
            etag: None,
            last_modified: None,
        }
    }

    /// Mark a chunk as fetched
    pub fn mark_done(&mut self, index: u32) {
        self.downloaded_chunks.insert(index);
    }

    /// Check whether a chunk was already fetched
    pub fn is_done(&self, index: u32) -> bool {
        self.downloaded_chunks.contains(&index)
    }

    /// Number of chunks still missing
    pub fn remaining(&self) -> u64 {
        self.total_chunks
            .saturating_sub(self.downloaded_chunks.len() as u64)
    }

    /// Check whether every chunk was fetched
    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    /// Validate persisted chunk indices against the remote resource
    ///
    /// A recorded validator that changed (or disappeared) on the server
    /// means the persisted chunks may belong to a different version of
    /// the file and must not be trusted. State that never recorded a
    /// validator cannot be checked and passes.
    pub fn matches_validators(&self, etag: Option<&str>, last_modified: Option<&str>) -> bool {
        let etag_ok = match (&self.etag, etag) {
            (Some(saved), Some(current)) => saved == current,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let last_modified_ok = match (&self.last_modified, last_modified) {
            (Some(saved), Some(current)) => saved == current,
            (Some(_), None) => false,
            (None, _) => true,
        };
        etag_ok && last_modified_ok
    }
}

/// Store for persisting resumable download state
///
/// Implementations must be safe to share across tasks. State is written
/// after every successfully fetched chunk and deleted on completion or
/// explicit cancel.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load state for a key, if any
    async fn get(&self, key: &StateKey) -> Result<Option<ResumableState>>;

    /// Save or replace state for a key
    async fn set(&self, key: &StateKey, state: &ResumableState) -> Result<()>;

    /// Delete state for a key
    async fn delete(&self, key: &StateKey) -> Result<()>;

    /// Delete all persisted state
    async fn clear_all(&self) -> Result<()>;
}

/// In-memory store for single-process resumability and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: parking_lot::RwLock<HashMap<StateKey, ResumableState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &StateKey) -> Result<Option<ResumableState>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &StateKey, state: &ResumableState) -> Result<()> {
        self.entries.write().insert(key.clone(), state.clone());
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}
