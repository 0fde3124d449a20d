//! Harness error types
//!
//! Fetch and extract errors are archive-level: they are recorded against
//! the archive and the run continues. `HarnessError` covers what stops a
//! run: an unusable report or work directory, or an index that cannot be
//! listed.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Archive retrieval errors
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body read failure
    #[error("Request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Cache error for {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    /// Worth another attempt: network trouble, server errors, throttling
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Archive unpacking errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt archive: {0}")]
    Corrupt(String),

    /// Entry whose path would land outside the destination
    #[error("Unsafe entry path in archive: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Run-level configuration errors
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Report directory {path} is not writable: {source}")]
    ReportDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Work directory {path} is not usable: {source}")]
    WorkDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive discovery failed: {0}")]
    Discovery(#[from] FetchError),

    #[error("Report write failed: {0}")]
    Report(String),
}
