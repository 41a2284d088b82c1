//! Error types for mcsync.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("device request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device returned status {status} for {path}")]
    DeviceStatus { status: u16, path: String },

    #[error("malformed device listing: {0}")]
    Listing(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("failed to persist base snapshot at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("content verification failed for {path}: wrote {expected}, destination reports {actual}")]
    Verify {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("sync aborted by user")]
    Aborted,
}
