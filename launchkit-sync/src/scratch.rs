//! Session temp area.
//!
//! Every top-level operation holds a [`TempGuard`]: the temp directory is
//! purged when the guard is taken and again when it drops, on success, error
//! or early return alike. Nothing else isolates a run from artifacts left
//! behind by an interrupted previous run.

use std::path::{Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Remove a directory tree, ignoring every error (including "not found").
pub fn remove_dir_best_effort(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "cleanup failed"),
    }
}

/// The session-scoped scratch directory for transfers.
#[derive(Debug, Clone)]
pub struct TempArea {
    dir: PathBuf,
}

impl TempArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of a file inside the temp area.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Remove the whole temp directory; failures are logged, never returned.
    pub fn purge(&self) {
        remove_dir_best_effort(&self.dir);
    }

    /// Create the temp directory if absent.
    pub fn ensure(&self) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))
    }

    /// Purge now and again when the returned guard drops.
    pub fn enter(&self) -> TempGuard<'_> {
        self.purge();
        TempGuard { area: self }
    }
}

/// Purges its [`TempArea`] on drop.
#[must_use = "the temp area is purged when the guard drops"]
pub struct TempGuard<'a> {
    area: &'a TempArea,
}

impl Drop for TempGuard<'_> {
    fn drop(&mut self) {
        self.area.purge();
    }
}
