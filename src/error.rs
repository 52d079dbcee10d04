// src/error.rs

//! Crate-wide error type and result alias
//!
//! One error enum covers the whole fetch pipeline. Per-package errors are
//! surfaced to the caller as values; they never abort sibling fetches.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the package cache and fetch pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed URL or package filename; fatal to the one package
    #[error("invalid package identity: {0}")]
    InvalidIdentity(String),

    /// No configured cache root is writable; fatal to the operation
    #[error("no writable package cache available")]
    NoWritableCache,

    /// Network or local transport failure
    #[error("transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        /// Transient failures are retried with backoff, permanent ones are not
        transient: bool,
    },

    /// Downloaded archive failed checksum verification
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Extraction failed or the embedded index is unreadable
    #[error("corrupt archive {}: {reason}", .path.display())]
    ArchiveCorrupt { path: PathBuf, reason: String },

    /// A cached record exhibits the legacy corruption signature.
    /// Not fatal: the fetcher reacts by re-extracting from the archive.
    #[error("corrupted cache record for {0}")]
    CacheCorrupt(String),

    /// Cooperative cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the fetcher may retry the failed step
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::ChecksumMismatch { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
