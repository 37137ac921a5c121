//! Error types for launchkit-sync.

use std::path::PathBuf;

use thiserror::Error;

use launchkit_core::CoreError;

/// All errors that can arise from sync, repair and publish operations.
///
/// An integrity mismatch found during repair is not an error: it is reported
/// through [`crate::integrity::IntegrityReport`] and drives a full update.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Publish pre-flight rejected the request; nothing was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An external hashing, compression or diff process failed.
    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },

    /// Network or storage error while moving one artifact.
    #[error("transfer of '{key}' failed: {reason}")]
    Transfer { key: String, reason: String },

    /// The game has no manifest at its well-known key.
    #[error("no manifest published for '{game}'")]
    ManifestMissing { game: String },

    /// The operation needs an installed build and there is none.
    #[error("'{game}' is not installed")]
    NotInstalled { game: String },

    /// Config, local state or manifest validation error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Manifest (de)serialization error.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Transfer`].
pub(crate) fn transfer_err(key: impl std::fmt::Display, reason: impl std::fmt::Display) -> SyncError {
    SyncError::Transfer {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
