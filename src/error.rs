//! Typed per-item failures.
//!
//! A single bad file never aborts a run: hashing, scoring, and relocation
//! wrap their failures in [`ItemError`], log them with `warn!`, and carry
//! them in their stage report.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ItemError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("scoring failed for {path}: {message}")]
    Scoring { path: PathBuf, message: String },

    #[error("path is not valid UTF-8: {path:?}")]
    NonUtf8Path { path: PathBuf },

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ItemError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ItemError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for ItemError {
    fn from(err: tokio::task::JoinError) -> Self {
        ItemError::Worker(err.to_string())
    }
}
