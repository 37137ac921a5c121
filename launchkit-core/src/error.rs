//! Error types for launchkit-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from configuration and local state operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON error while reading or writing a state record or manifest.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error on config load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A version string that is not a valid semantic version.
    #[error("invalid version '{version}': {source}")]
    InvalidVersion {
        version: String,
        #[source]
        source: semver::Error,
    },

    /// A manifest whose contents violate its own invariants.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`CoreError::Io`].
pub fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
