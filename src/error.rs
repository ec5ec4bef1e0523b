//! Typed error hierarchy for the transfer engine
//!
//! Every error carries enough context to decide whether the operation
//! that produced it can be retried.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the transfer engine
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-related errors (connection, reset, timeout, DNS, etc.)
    #[error("Network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
        retryable: bool,
    },

    /// Server answered with an unexpected HTTP status
    #[error("Server error: HTTP {status}: {message}")]
    Server { status: u16, message: String },

    /// Caller-initiated cancellation
    #[error("Transfer cancelled")]
    Cancelled,

    /// Chunk count/size mismatch while finalizing an assembled result
    #[error("Assembly error: {0}")]
    Assembly(String),

    /// Writing transfer data to local storage failed
    #[error("Storage write error at {path:?}: {message}")]
    StorageWrite { path: PathBuf, message: String },

    /// Invalid configuration; surfaces immediately, never retried
    #[error("Invalid configuration for '{field}': {message}")]
    Config {
        field: &'static str,
        message: String,
    },

    /// Resumable state store failure
    #[error("State store error: {0}")]
    State(String),

    /// Internal error (bug)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// Connection refused
    ConnectionRefused,
    /// Connection reset mid-transfer
    ConnectionReset,
    /// Request or read timed out
    Timeout,
    /// Other network error
    Other,
}

impl TransferError {
    /// Check if this error is retryable
    ///
    /// Retryable: network failures, timeouts, HTTP 5xx, 408 and 429.
    /// Everything else is fatal; cancellation in particular is never
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { retryable, .. } => *retryable,
            Self::Server { status, .. } => matches!(status, 500..=599 | 408 | 429),
            _ => false,
        }
    }

    /// Create a network error; retryability follows the kind
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            NetworkErrorKind::Timeout
                | NetworkErrorKind::ConnectionRefused
                | NetworkErrorKind::ConnectionReset
        );
        Self::Network {
            kind,
            message: message.into(),
            retryable,
        }
    }

    /// Create a retryable timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::network(NetworkErrorKind::Timeout, message)
    }

    /// Create a server error from an HTTP status
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Create a storage write error
    pub fn storage_write(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StorageWrite {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

// Implement From traits for common error types

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageWrite {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::network(NetworkErrorKind::Timeout, err.to_string());
        }
        if err.is_connect() {
            return Self::network(NetworkErrorKind::ConnectionRefused, err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::server(status.as_u16(), err.to_string());
        }
        // Body/stream errors land here; the connection may recover
        Self::Network {
            kind: NetworkErrorKind::Other,
            message: err.to_string(),
            retryable: true,
        }
    }
}

impl From<url::ParseError> for TransferError {
    fn from(err: url::ParseError) -> Self {
        Self::config("url", err.to_string())
    }
}

impl From<rusqlite::Error> for TransferError {
    fn from(err: rusqlite::Error) -> Self {
        Self::State(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        Self::State(format!("JSON error: {}", err))
    }
}
