//! SQLite state store
//!
//! Durable resumable-state persistence using SQLite with WAL mode, so a
//! download interrupted by a crash or restart can resume in a new
//! process.

use super::{ResumableState, StateKey, StateStore};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed resumable state store
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

/// Current schema version — bump when adding migrations
const CURRENT_SCHEMA_VERSION: u32 = 1;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS resumable_state (
    key TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    file_name TEXT NOT NULL,
    total_chunks INTEGER NOT NULL,
    file_size INTEGER NOT NULL,
    etag TEXT,
    last_modified TEXT,
    chunks_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resumable_target ON resumable_state(target);
"#;

/// Apply schema migrations tracked via `PRAGMA user_version`
fn migrate(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    }

    Ok(())
}

impl SqliteStateStore {
    /// Open (or create) a store at the given path
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    TransferError::State(format!("Failed to create store directory: {}", e))
                })?;
            }
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;

            // WAL for crash safety under concurrent readers
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;

            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| TransferError::State(format!("Failed to initialize store: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| TransferError::State(format!("Failed to create in-memory store: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &StateKey) -> Result<Option<ResumableState>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT total_chunks, file_size, etag, last_modified, chunks_json
                 FROM resumable_state WHERE key = ?1",
                params![key.composite()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((total_chunks, file_size, etag, last_modified, chunks_json)) => {
                let downloaded_chunks = serde_json::from_str(&chunks_json)?;
                Ok(Some(ResumableState {
                    downloaded_chunks,
                    total_chunks: total_chunks as u64,
                    file_size: file_size as u64,
                    etag,
                    last_modified,
                }))
            }
        }
    }

    async fn set(&self, key: &StateKey, state: &ResumableState) -> Result<()> {
        let chunks_json = serde_json::to_string(&state.downloaded_chunks)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO resumable_state
                 (key, target, file_name, total_chunks, file_size, etag, last_modified,
                  chunks_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(key) DO UPDATE SET
                 total_chunks = excluded.total_chunks,
                 file_size = excluded.file_size,
                 etag = excluded.etag,
                 last_modified = excluded.last_modified,
                 chunks_json = excluded.chunks_json,
                 updated_at = excluded.updated_at",
            params![
                key.composite(),
                key.target,
                key.file_name,
                state.total_chunks as i64,
                state.file_size as i64,
                state.etag,
                state.last_modified,
                chunks_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM resumable_state WHERE key = ?1",
            params![key.composite()],
        )?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM resumable_state", [])?;
        Ok(())
    }
}
