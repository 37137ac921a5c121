//! Sync orchestrator: reconcile the installed build of one game with its
//! published manifest.
//!
//! The decision is a pure function of the installed version, the published
//! version and the set of versions the manifest publishes patches from:
//!
//! ```text
//! installed  published  patch from installed   action
//! none       any        -                      Install
//! V          V          -                      UpToDate
//! U          V          yes                    Patch
//! U          V          no                     FullUpdate
//! ```
//!
//! Every mutating operation on a [`Session`] is serialized, runs inside a
//! purged temp area and records the installed version only after the build
//! tree has been fully materialized.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use launchkit_core::{
    state, ArtifactKey, BuildManifest, BuildVersion, Direction, GameName, LauncherConfig, Layout,
};

use crate::error::{io_err, SyncError};
use crate::installer;
use crate::integrity::{self, IntegrityReport, SizeMap};
use crate::progress::{ProgressEvent, ProgressSink, Stage};
use crate::scratch::{remove_dir_best_effort, TempArea, TempGuard};
use crate::tools::Toolchain;
use crate::transfer::{store_from_config, ObjectStore};

// ---------------------------------------------------------------------------
// States and decisions
// ---------------------------------------------------------------------------

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Unknown,
    NeedsInstall,
    NeedsPatch,
    NeedsFullUpdate,
    Verifying,
    Repairing,
    UpToDate,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncState::Unknown => "unknown",
            SyncState::NeedsInstall => "needs install",
            SyncState::NeedsPatch => "needs patch",
            SyncState::NeedsFullUpdate => "needs full update",
            SyncState::Verifying => "verifying",
            SyncState::Repairing => "repairing",
            SyncState::UpToDate => "up to date",
        };
        f.write_str(label)
    }
}

/// What a sync pass must do to reach the published build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Install,
    Patch {
        from: BuildVersion,
        artifact: ArtifactKey,
    },
    FullUpdate {
        from: BuildVersion,
    },
    UpToDate,
}

impl SyncAction {
    pub fn state(&self) -> SyncState {
        match self {
            SyncAction::Install => SyncState::NeedsInstall,
            SyncAction::Patch { .. } => SyncState::NeedsPatch,
            SyncAction::FullUpdate { .. } => SyncState::NeedsFullUpdate,
            SyncAction::UpToDate => SyncState::UpToDate,
        }
    }
}

/// Decide the sync action for `installed` against `manifest`.
pub fn decide(installed: Option<&BuildVersion>, manifest: &BuildManifest) -> SyncAction {
    match installed {
        None => SyncAction::Install,
        Some(v) if *v == manifest.version => SyncAction::UpToDate,
        Some(v) => match manifest.patch_for(v) {
            Some(artifact) => SyncAction::Patch {
                from: v.clone(),
                artifact,
            },
            None => SyncAction::FullUpdate { from: v.clone() },
        },
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of a completed sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Installed { version: BuildVersion },
    Patched { from: BuildVersion, to: BuildVersion },
    Updated { from: BuildVersion, to: BuildVersion },
    UpToDate { version: BuildVersion },
}

/// Result of a repair request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Another repair holds the token; this request did nothing.
    AlreadyRunning,
    /// The installed build is not the published one; sync instead.
    Skipped { state: SyncState },
    /// Sizes and digests match the manifest.
    Clean { version: BuildVersion },
    /// A mismatch was found and the build was reinstalled.
    Repaired {
        version: BuildVersion,
        report: IntegrityReport,
    },
}

/// Read-only summary of a game, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub game: GameName,
    pub installed: Option<BuildVersion>,
    pub published: Option<BuildVersion>,
    pub state: SyncState,
    pub executable: Option<PathBuf>,
    pub install_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Repair token
// ---------------------------------------------------------------------------

/// Held for the duration of one repair; released on drop.
struct RepairToken<'a>(&'a AtomicBool);

impl<'a> RepairToken<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RepairToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// All operations on one game's installed build.
pub struct Session {
    pub(crate) game: GameName,
    pub(crate) layout: Layout,
    pub(crate) temp: TempArea,
    pub(crate) store: Box<dyn ObjectStore>,
    pub(crate) tools: Toolchain,
    pub(crate) progress: ProgressSink,
    pub(crate) volume_size: u64,
    state: Mutex<SyncState>,
    /// Serializes every operation that touches the build tree.
    pub(crate) busy: Mutex<()>,
    repairing: AtomicBool,
}

impl Session {
    pub fn new(
        game: impl Into<GameName>,
        layout: Layout,
        store: Box<dyn ObjectStore>,
        tools: Toolchain,
    ) -> Self {
        let temp = TempArea::new(layout.temp_dir());
        Self {
            game: game.into(),
            layout,
            temp,
            store,
            tools,
            progress: ProgressSink::disabled(),
            volume_size: launchkit_core::config::DEFAULT_VOLUME_SIZE,
            state: Mutex::new(SyncState::Unknown),
            busy: Mutex::new(()),
            repairing: AtomicBool::new(false),
        }
    }

    /// Storage and external tools as configured, rooted at `home`.
    pub fn from_config(game: impl Into<GameName>, config: &LauncherConfig, home: &Path) -> Self {
        Self::new(
            game,
            config.layout_at(home),
            store_from_config(config),
            Toolchain::from_config(&config.tools),
        )
        .with_volume_size(config.volume_size_bytes)
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_volume_size(mut self, bytes: u64) -> Self {
        self.volume_size = bytes.max(1);
        self
    }

    pub fn game(&self) -> &GameName {
        &self.game
    }

    pub fn install_dir(&self) -> PathBuf {
        self.layout.game_dir(&self.game)
    }

    pub fn state(&self) -> SyncState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SyncState) {
        *lock(&self.state) = next;
        tracing::debug!(game = %self.game, state = %next, "state");
        self.progress.state(next);
    }

    pub(crate) fn enter_temp(&self) -> TempGuard<'_> {
        self.progress.step(Stage::Cleaning);
        self.temp.enter()
    }

    // -- manifest ------------------------------------------------------------

    /// Fetch and validate the published manifest; `ManifestMissing` when absent.
    pub fn fetch_manifest(&self) -> Result<BuildManifest, SyncError> {
        self.try_fetch_manifest()?
            .ok_or_else(|| SyncError::ManifestMissing {
                game: self.game.to_string(),
            })
    }

    pub(crate) fn try_fetch_manifest(&self) -> Result<Option<BuildManifest>, SyncError> {
        let key = ArtifactKey::manifest(&self.game);
        let Some(bytes) = self.store.get_bytes(&key)? else {
            return Ok(None);
        };
        let manifest: BuildManifest = serde_json::from_slice(&bytes)?;
        manifest.validate()?;
        if manifest.game_name != self.game {
            tracing::warn!(
                game = %self.game,
                manifest_game = %manifest.game_name,
                "manifest names a different game"
            );
        }
        Ok(Some(manifest))
    }

    // -- status --------------------------------------------------------------

    pub fn status(&self) -> Result<StatusReport, SyncError> {
        let local = state::load(&self.layout, &self.game)?;
        let manifest = self.try_fetch_manifest()?;
        let state = manifest
            .as_ref()
            .map(|m| decide(local.version.as_ref(), m).state())
            .unwrap_or(SyncState::Unknown);
        Ok(StatusReport {
            game: self.game.clone(),
            installed: local.version,
            published: manifest.map(|m| m.version),
            state,
            executable: local.executable,
            install_dir: self.install_dir(),
        })
    }

    // -- sync ----------------------------------------------------------------

    /// Bring the installed build to the published version.
    ///
    /// A missing manifest fails with `ManifestMissing` and leaves local state untouched.
    pub fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let _busy = lock(&self.busy);
        let _temp = self.enter_temp();
        let result = self.sync_locked();
        if result.is_err() {
            self.set_state(SyncState::Unknown);
        }
        result
    }

    fn sync_locked(&self) -> Result<SyncOutcome, SyncError> {
        self.set_state(SyncState::Unknown);
        let manifest = self.fetch_manifest()?;
        let local = state::load(&self.layout, &self.game)?;
        let action = decide(local.version.as_ref(), &manifest);
        tracing::info!(
            game = %self.game,
            installed = ?local.version,
            published = %manifest.version,
            action = %action.state(),
            "sync decision"
        );
        self.set_state(action.state());

        let to = manifest.version.clone();
        let outcome = match action {
            SyncAction::UpToDate => SyncOutcome::UpToDate { version: to },
            SyncAction::Install => {
                self.full_install(&manifest, false)?;
                SyncOutcome::Installed { version: to }
            }
            SyncAction::FullUpdate { from } => {
                self.full_install(&manifest, true)?;
                SyncOutcome::Updated { from, to }
            }
            SyncAction::Patch { from, artifact } => {
                self.apply_patch(&manifest, &from, &artifact)?;
                SyncOutcome::Patched { from, to }
            }
        };
        self.set_state(SyncState::UpToDate);
        Ok(outcome)
    }

    /// Download every volume, then replace the tree with their contents.
    ///
    /// With `replace`, the recorded version is cleared before the old tree
    /// goes, so an interruption is later seen as "not installed".
    fn full_install(&self, manifest: &BuildManifest, replace: bool) -> Result<(), SyncError> {
        if manifest.files.is_empty() {
            return Err(SyncError::Validation(format!(
                "manifest for {} {} lists no archive volumes",
                manifest.game_name, manifest.version
            )));
        }
        let volumes = self.download_volumes(manifest)?;
        let tree = self.install_dir();
        if replace {
            state::update(&self.layout, &self.game, |s| s.version = None)?;
            remove_dir_best_effort(&tree);
        }
        self.progress.step(Stage::Installing);
        installer::install_full(
            self.tools.compressor.as_ref(),
            &tree,
            &volumes,
            &mut |p| self.progress.percent(Stage::Installing, p),
        )?;
        self.record_installed(manifest)
    }

    fn apply_patch(
        &self,
        manifest: &BuildManifest,
        from: &BuildVersion,
        artifact: &ArtifactKey,
    ) -> Result<(), SyncError> {
        self.temp.ensure()?;
        let local = self.temp.file(artifact.file_name());
        self.progress.step(Stage::Downloading);
        self.download(artifact, &local, 0, 1)?;
        self.progress.step(Stage::Patching);
        installer::install_patch(
            self.tools.differ.as_ref(),
            &self.install_dir(),
            manifest,
            from,
            &local,
        )?;
        self.record_installed(manifest)
    }

    fn record_installed(&self, manifest: &BuildManifest) -> Result<(), SyncError> {
        state::update(&self.layout, &self.game, |s| {
            s.version = Some(manifest.version.clone());
            s.executable = Some(manifest.executable.clone());
        })?;
        tracing::info!(game = %self.game, version = %manifest.version, "build installed");
        Ok(())
    }

    fn download_volumes(&self, manifest: &BuildManifest) -> Result<Vec<PathBuf>, SyncError> {
        self.temp.ensure()?;
        let keys = manifest.volume_keys();
        self.progress.step(Stage::Downloading);
        let mut paths = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            let local = self.temp.file(key.file_name());
            self.download(key, &local, index, keys.len())?;
            paths.push(local);
        }
        Ok(paths)
    }

    fn download(
        &self,
        key: &ArtifactKey,
        local: &Path,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        tracing::info!(key = %key, index, count, "downloading");
        self.store.download(key, local, &mut |transferred, total| {
            self.progress.emit(ProgressEvent::Transfer {
                direction: Direction::Download,
                key: key.clone(),
                index,
                count,
                transferred,
                total,
            })
        })
    }

    // -- repair --------------------------------------------------------------

    /// Verify an up-to-date build and reinstall it on any mismatch.
    ///
    /// While one repair runs, further requests return
    /// [`RepairOutcome::AlreadyRunning`] without doing any work.
    pub fn repair(&self) -> Result<RepairOutcome, SyncError> {
        let Some(_token) = RepairToken::acquire(&self.repairing) else {
            tracing::debug!(game = %self.game, "repair already in progress, request dropped");
            return Ok(RepairOutcome::AlreadyRunning);
        };
        let _busy = lock(&self.busy);
        let _temp = self.enter_temp();
        let result = self.repair_locked();
        if result.is_err() {
            self.set_state(SyncState::Unknown);
        }
        result
    }

    fn repair_locked(&self) -> Result<RepairOutcome, SyncError> {
        let manifest = self.fetch_manifest()?;
        let local = state::load(&self.layout, &self.game)?;
        let action = decide(local.version.as_ref(), &manifest);
        if action != SyncAction::UpToDate {
            tracing::info!(game = %self.game, state = %action.state(), "repair skipped");
            self.set_state(action.state());
            return Ok(RepairOutcome::Skipped {
                state: action.state(),
            });
        }

        self.set_state(SyncState::Verifying);
        let report = self.verify(&manifest)?;
        let version = manifest.version.clone();
        if report.is_clean() {
            tracing::info!(game = %self.game, %version, "integrity verified");
            self.set_state(SyncState::UpToDate);
            return Ok(RepairOutcome::Clean { version });
        }

        tracing::warn!(game = %self.game, mismatch = %report.summary(), "integrity mismatch, reinstalling");
        self.set_state(SyncState::NeedsFullUpdate);
        self.set_state(SyncState::Repairing);
        self.full_install(&manifest, true)?;
        self.set_state(SyncState::UpToDate);
        Ok(RepairOutcome::Repaired { version, report })
    }

    /// Size pre-check, then a full hash pass if sizes agree.
    fn verify(&self, manifest: &BuildManifest) -> Result<IntegrityReport, SyncError> {
        let report = self.check_sizes(manifest)?;
        if !report.is_clean() {
            tracing::debug!(game = %self.game, mismatch = %report.summary(), "size pre-check failed");
            return Ok(report);
        }
        self.progress.step(Stage::Verifying);
        let hashes = integrity::hash(
            self.tools.digests.as_ref(),
            &self.install_dir(),
            true,
            &mut |p| self.progress.percent(Stage::Hashing, p),
        )?;
        Ok(integrity::compare_digests(&manifest.hashes, &hashes))
    }

    fn check_sizes(&self, manifest: &BuildManifest) -> Result<IntegrityReport, SyncError> {
        let tree = self.install_dir();
        let actual = if tree.is_dir() {
            integrity::size(&tree)?
        } else {
            SizeMap::new()
        };
        Ok(integrity::compare_sizes(&manifest.sizes, &actual))
    }

    // -- launch / uninstall --------------------------------------------------

    /// Start the installed executable with `args`.
    ///
    /// When the installed build is the published one, a failed size check
    /// triggers a repair first. An unreachable or missing manifest only
    /// skips the check.
    pub fn launch(&self, args: &[String]) -> Result<Child, SyncError> {
        let local = state::load(&self.layout, &self.game)?;
        let Some(installed) = local.version else {
            return Err(SyncError::NotInstalled {
                game: self.game.to_string(),
            });
        };

        match self.fetch_manifest() {
            Ok(manifest) if manifest.version == installed => {
                let report = {
                    let _busy = lock(&self.busy);
                    self.check_sizes(&manifest)?
                };
                if !report.is_clean() {
                    tracing::warn!(game = %self.game, mismatch = %report.summary(), "size check failed, repairing before launch");
                    self.repair()?;
                }
            }
            Ok(manifest) => tracing::info!(
                game = %self.game,
                %installed,
                published = %manifest.version,
                "update available, launching installed build"
            ),
            Err(e @ (SyncError::ManifestMissing { .. } | SyncError::Transfer { .. })) => {
                tracing::warn!(game = %self.game, error = %e, "launching without verification")
            }
            Err(e) => return Err(e),
        }

        let local = state::load(&self.layout, &self.game)?;
        let executable = local.executable.ok_or_else(|| SyncError::NotInstalled {
            game: self.game.to_string(),
        })?;
        let tree = self.install_dir();
        let program = tree.join(executable);
        tracing::info!(game = %self.game, program = %program.display(), "launching");
        Command::new(&program)
            .args(args)
            .current_dir(&tree)
            .spawn()
            .map_err(|e| io_err(&program, e))
    }

    /// Remove the installed tree and the local state record.
    pub fn uninstall(&self) -> Result<(), SyncError> {
        let _busy = lock(&self.busy);
        let _temp = self.enter_temp();
        remove_dir_best_effort(&self.install_dir());
        state::remove(&self.layout, &self.game)?;
        tracing::info!(game = %self.game, "uninstalled");
        self.set_state(SyncState::Unknown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn manifest(version: &str, from: &[&str]) -> BuildManifest {
        BuildManifest {
            game_name: "zomfi".into(),
            version: version.into(),
            executable: "game.exe".into(),
            files: vec![format!("Game_{}.7z.001", version.replace('.', "_"))],
            hashes: BTreeMap::new(),
            sizes: BTreeMap::new(),
            from: from
                .iter()
                .map(|v| {
                    (
                        BuildVersion::from(*v),
                        format!("PATCH_{}_TO_{}.bin", v.replace('.', "_"), version.replace('.', "_")),
                    )
                })
                .collect(),
            published_at: None,
        }
    }

    #[test]
    fn nothing_installed_needs_install() {
        assert_eq!(decide(None, &manifest("1.0.0", &[])), SyncAction::Install);
    }

    #[test]
    fn same_version_is_up_to_date() {
        let v = BuildVersion::from("1.0.0");
        assert_eq!(decide(Some(&v), &manifest("1.0.0", &[])), SyncAction::UpToDate);
    }

    #[test]
    fn published_patch_is_preferred() {
        let v = BuildVersion::from("1.0.0");
        assert_eq!(
            decide(Some(&v), &manifest("1.0.1", &["1.0.0"])),
            SyncAction::Patch {
                from: v.clone(),
                artifact: ArtifactKey("zomfi/PATCH_1_0_0_TO_1_0_1.bin".into()),
            }
        );
    }

    #[test]
    fn patch_only_matches_exact_version() {
        let v = BuildVersion::from("0.9.0");
        assert_eq!(
            decide(Some(&v), &manifest("1.0.1", &["1.0.0"])),
            SyncAction::FullUpdate { from: v.clone() }
        );
    }

    #[test]
    fn older_published_version_is_still_reconciled() {
        // Rollbacks: any difference triggers an update, not only newer builds.
        let v = BuildVersion::from("2.0.0");
        assert_eq!(decide(Some(&v), &manifest("1.0.0", &[])).state(), SyncState::NeedsFullUpdate);
    }

    #[test]
    fn repair_token_is_exclusive_and_released() {
        let flag = AtomicBool::new(false);
        let first = RepairToken::acquire(&flag).expect("first acquire");
        assert!(RepairToken::acquire(&flag).is_none());
        drop(first);
        assert!(RepairToken::acquire(&flag).is_some());
    }

    #[test]
    fn state_labels() {
        assert_eq!(SyncState::NeedsFullUpdate.to_string(), "needs full update");
        assert_eq!(
            serde_json::to_string(&SyncState::UpToDate).unwrap(),
            "\"up_to_date\""
        );
    }
}
