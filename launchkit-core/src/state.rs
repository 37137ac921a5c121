//! Per-game local state store.
//!
//! One JSON record per game at `<root>/state/<game>.json`
//! (`{version, executable, folder}`).
//!
//! Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
//! The `.tmp` file always lives next to the target so the rename stays on one
//! filesystem. A missing record loads as the default "not installed" state.

use std::path::Path;

use chrono::Utc;

use crate::config::Layout;
use crate::error::{io_err, CoreError};
use crate::types::{GameName, LocalState};

/// Load the state record for `game`; returns the default state if none exists.
pub fn load(layout: &Layout, game: &GameName) -> Result<LocalState, CoreError> {
    let path = layout.state_path(game);
    if !path.exists() {
        return Ok(LocalState::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Atomically save the state record for `game`, stamping `updated_at`.
pub fn save(layout: &Layout, game: &GameName, state: &LocalState) -> Result<(), CoreError> {
    let dir = layout.state_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }

    let path = layout.state_path(game);
    let tmp = path.with_extension("json.tmp");

    let mut stamped = state.clone();
    stamped.updated_at = Some(Utc::now());
    let json = serde_json::to_string_pretty(&stamped)?;

    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    tracing::debug!(game = %game, version = ?state.version, "saved local state");
    Ok(())
}

/// Load, apply `f`, save. Returns the saved state.
pub fn update(
    layout: &Layout,
    game: &GameName,
    f: impl FnOnce(&mut LocalState),
) -> Result<LocalState, CoreError> {
    let mut state = load(layout, game)?;
    f(&mut state);
    save(layout, game, &state)?;
    Ok(state)
}

/// Delete the state record for `game`. Missing records are not an error.
pub fn remove(layout: &Layout, game: &GameName) -> Result<(), CoreError> {
    let path = layout.state_path(game);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(&path, e)),
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), CoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildVersion;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> Layout {
        Layout::new(tmp.path())
    }

    fn game() -> GameName {
        GameName::from("Zomfi")
    }

    #[test]
    fn missing_record_is_not_installed() {
        let tmp = TempDir::new().unwrap();
        let state = load(&layout(&tmp), &game()).unwrap();
        assert!(!state.is_installed());
        assert_eq!(state, LocalState::default());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let state = LocalState {
            version: Some(BuildVersion::from("1.0.0")),
            executable: Some(PathBuf::from("bin/game.exe")),
            folder: None,
            updated_at: None,
        };
        save(&layout(&tmp), &game(), &state).unwrap();
        let loaded = load(&layout(&tmp), &game()).unwrap();
        assert_eq!(loaded.version, state.version);
        assert_eq!(loaded.executable, state.executable);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let tmp = TempDir::new().unwrap();
        save(&layout(&tmp), &game(), &LocalState::default()).unwrap();
        let tmp_path = layout(&tmp).state_path(&game()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn state_dir_created_with_perms() {
        let tmp = TempDir::new().unwrap();
        save(&layout(&tmp), &game(), &LocalState::default()).unwrap();
        let dir = layout(&tmp).state_dir();
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn update_merges_fields() {
        let tmp = TempDir::new().unwrap();
        update(&layout(&tmp), &game(), |s| {
            s.folder = Some(PathBuf::from("/src/zomfi"));
        })
        .unwrap();
        let saved = update(&layout(&tmp), &game(), |s| {
            s.version = Some(BuildVersion::from("2.0.0"));
        })
        .unwrap();
        assert_eq!(saved.folder, Some(PathBuf::from("/src/zomfi")));
        assert_eq!(saved.version, Some(BuildVersion::from("2.0.0")));
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        save(&layout(&tmp), &game(), &LocalState::default()).unwrap();
        remove(&layout(&tmp), &game()).unwrap();
        remove(&layout(&tmp), &game()).unwrap();
        assert!(!layout(&tmp).state_path(&game()).exists());
    }

    #[test]
    fn legacy_record_without_timestamp_loads() {
        let tmp = TempDir::new().unwrap();
        let path = layout(&tmp).state_path(&game());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"version":null,"executable":null,"folder":"D:/builds/zomfi"}"#,
        )
        .unwrap();
        let state = load(&layout(&tmp), &game()).unwrap();
        assert!(!state.is_installed());
        assert_eq!(state.folder, Some(PathBuf::from("D:/builds/zomfi")));
    }
}
