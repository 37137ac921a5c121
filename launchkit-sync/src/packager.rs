//! Build packager: split a source tree into an ordered set of archive volumes.

use std::path::{Path, PathBuf};

use launchkit_core::BuildVersion;

use crate::error::{io_err, SyncError};
use crate::scratch::TempArea;
use crate::tools::Compressor;

/// `Game_<version>.7z`, the base name every volume of a build shares.
pub fn archive_name(version: &BuildVersion) -> String {
    format!("Game_{}.7z", version.sanitized())
}

/// Numeric volume suffix of `name` under `base` (`Game_1_0_0.7z.003` -> 3).
fn volume_index(base: &str, name: &str) -> Option<u32> {
    let suffix = name.strip_prefix(base)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Compress `source` into `volume_size`-byte volumes inside the temp area.
///
/// Returns the volume files in extraction order. Anything else in the temp
/// area, such as a patch produced earlier in the same publish, is excluded.
/// `progress` receives the compressor's own percentages unchanged.
pub fn package(
    compressor: &dyn Compressor,
    temp: &TempArea,
    version: &BuildVersion,
    source: &Path,
    volume_size: u64,
    progress: &mut dyn FnMut(f32),
) -> Result<Vec<PathBuf>, SyncError> {
    temp.ensure()?;
    let base = archive_name(version);
    compressor.compress(source, &temp.file(&base), volume_size, progress)?;

    let entries = std::fs::read_dir(temp.path()).map_err(|e| io_err(temp.path(), e))?;
    let mut volumes: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            volume_index(&base, &name).map(|i| (i, e.path()))
        })
        .collect();
    volumes.sort_by_key(|(i, _)| *i);

    if volumes.is_empty() {
        return Err(SyncError::Tool {
            tool: "compressor".to_string(),
            status: "no volumes".to_string(),
            stderr: format!("no '{base}.NNN' volumes in {}", temp.path().display()),
        });
    }
    tracing::info!(version = %version, volumes = volumes.len(), "packaged build");
    Ok(volumes.into_iter().map(|(_, p)| p).collect())
}
