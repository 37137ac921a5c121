//! Patch generator: one binary delta between an installed tree and a new source tree.

use std::path::{Path, PathBuf};

use launchkit_core::BuildVersion;

use crate::error::SyncError;
use crate::scratch::TempArea;
use crate::tools::Differ;

/// `PATCH_<from>_TO_<to>.bin`, deterministic for a version pair.
pub fn patch_name(from: &BuildVersion, to: &BuildVersion) -> String {
    format!("PATCH_{}_TO_{}.bin", from.sanitized(), to.sanitized())
}

/// Diff `installed` (at `from`) against `source` (at `to`) into the temp area.
///
/// Any tool failure is returned as is; the caller must abort the publish.
pub fn diff(
    differ: &dyn Differ,
    temp: &TempArea,
    installed: &Path,
    source: &Path,
    from: &BuildVersion,
    to: &BuildVersion,
) -> Result<PathBuf, SyncError> {
    temp.ensure()?;
    let out = temp.file(&patch_name(from, to));
    tracing::info!(%from, %to, "computing patch");
    differ.diff(installed, source, &out)?;
    if !out.is_file() {
        return Err(SyncError::Tool {
            tool: "differ".to_string(),
            status: "no output".to_string(),
            stderr: format!("expected patch at {}", out.display()),
        });
    }
    Ok(out)
}
