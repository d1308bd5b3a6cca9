//! Error taxonomy for branch verification and file synchronization.
//!
//! Per-file errors during a multi-file run are collected by the caller;
//! these types describe what went wrong for a single operation.

use std::path::PathBuf;

use crate::access::Accessibility;

/// Errors produced by the synchronization engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Local filesystem read/write failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Remote metadata could not be fetched (network or non-2xx response)
    #[error("Manifest unavailable from {url}: {reason}")]
    ManifestUnavailable { url: String, reason: String },

    /// Remote metadata was fetched but is missing required fields
    #[error("Manifest malformed: {0}")]
    ManifestMalformed(String),

    /// Transport failure during a file transfer
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// Content integrity failure
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Locked or permission-denied path
    #[error("Access blocked for {path}: {access}")]
    AccessBlocked { path: PathBuf, access: Accessibility },

    /// Bulk download gave up on a file
    #[error("Download of {file} failed after {attempts} attempts: {reason}")]
    RetryExhausted {
        file: String,
        attempts: u32,
        reason: String,
    },
}

impl SyncError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn network(url: &str, reason: impl std::fmt::Display) -> Self {
        SyncError::Network {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
