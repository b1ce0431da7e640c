//! Error types for the synchronization engine.
//!
//! Every variant aborts the current run: there is no partial-success mode.
//! The next scheduled run retries from the last known-good manifest.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by a synchronization run.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The mod portal could not be reached or returned garbage.
    #[error("mod portal unavailable at '{url}': {reason}")]
    CatalogUnavailable { url: String, reason: String },

    /// The manifest file exists but could not be read or parsed.
    /// An absent manifest is not an error (first-run case).
    #[error("failed to read manifest '{path}': {reason}")]
    ManifestReadFailed { path: PathBuf, reason: String },

    /// The pre-mutation archive copy of the manifest could not be written.
    #[error("failed to archive manifest '{path}' to '{archive_path}'")]
    ArchiveFailed {
        path: PathBuf,
        archive_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The new manifest could not be persisted.
    #[error("failed to write manifest '{path}'")]
    ManifestWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fetch failed (network or staging storage). `mod_name` is empty when
    /// the failure happened before any specific mod was being fetched.
    #[error("download failed: {reason}")]
    DownloadFailed { mod_name: String, reason: String },

    /// A fetched archive did not hash to the checksum the catalog promised.
    #[error("checksum mismatch for '{mod_name}': expected {expected}, got {actual}")]
    IntegrityMismatch {
        mod_name: String,
        expected: String,
        actual: String,
    },

    /// A filesystem operation failed while promoting staged files.
    #[error("commit failed while {operation} '{path}'")]
    CommitFailed {
        operation: FileOperation,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Bad or incomplete configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Filesystem operation names for commit error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Move,
    Delete,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
