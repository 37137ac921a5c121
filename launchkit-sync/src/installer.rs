//! Installer: materialize a build from archive volumes, or upgrade one in place with a patch.

use std::path::{Path, PathBuf};

use launchkit_core::{BuildManifest, BuildVersion};

use crate::error::{io_err, SyncError};
use crate::scratch::remove_dir_best_effort;
use crate::tools::{Compressor, Differ};

/// Replace `tree` with the contents of the volume set.
///
/// Whatever is at `tree` is removed first (best effort), then the first
/// volume is extracted; the compressor follows the remaining volumes itself.
pub fn install_full(
    compressor: &dyn Compressor,
    tree: &Path,
    volumes: &[PathBuf],
    progress: &mut dyn FnMut(f32),
) -> Result<(), SyncError> {
    let first = volumes
        .first()
        .ok_or_else(|| SyncError::Validation("build lists no archive volumes".to_string()))?;
    if let Some(missing) = volumes.iter().find(|v| !v.is_file()) {
        return Err(io_err(
            missing,
            std::io::Error::new(std::io::ErrorKind::NotFound, "volume not downloaded"),
        ));
    }

    remove_dir_best_effort(tree);
    std::fs::create_dir_all(tree).map_err(|e| io_err(tree, e))?;
    tracing::info!(tree = %tree.display(), volumes = volumes.len(), "extracting build");
    compressor.extract(first, tree, progress)
}

/// Apply `patch` to `tree` in place.
///
/// Only valid when `manifest` publishes a patch for exactly `installed`;
/// nothing is deleted beforehand.
pub fn install_patch(
    differ: &dyn Differ,
    tree: &Path,
    manifest: &BuildManifest,
    installed: &BuildVersion,
    patch: &Path,
) -> Result<(), SyncError> {
    if manifest.patch_for(installed).is_none() {
        return Err(SyncError::Validation(format!(
            "no patch from {installed} to {}",
            manifest.version
        )));
    }
    if !tree.is_dir() {
        return Err(SyncError::NotInstalled {
            game: manifest.game_name.to_string(),
        });
    }
    tracing::info!(from = %installed, to = %manifest.version, "applying patch");
    differ.apply(tree, patch)
}
