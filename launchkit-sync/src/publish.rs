//! Publisher: package a source folder as a new build, upload it, and
//! replace the game's manifest.
//!
//! Order of effects:
//! 1. pre-flight validation (nothing is written if it fails)
//! 2. patch from the installed copy of the current build, when there is one
//! 3. hashes and sizes of the source folder
//! 4. archive volumes
//! 5. manifest consistency check (nothing is uploaded if it fails)
//! 6. uploads: volumes, then the patch
//! 7. the manifest, always last

use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use launchkit_core::{state, ArtifactKey, BuildManifest, BuildVersion, Direction};

use crate::error::{io_err, SyncError};
use crate::integrity;
use crate::orchestrator::Session;
use crate::packager;
use crate::patcher;
use crate::progress::{ProgressEvent, Stage};

/// What to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Folder holding the new build.
    pub source: PathBuf,
    /// Executable, relative to `source` (or an absolute path inside it).
    pub executable: PathBuf,
    pub version: BuildVersion,
}

impl PublishRequest {
    /// Pre-flight checks against the currently published manifest.
    ///
    /// Returns the executable as a `/`-separated path relative to `source`.
    pub fn validate(&self, current: Option<&BuildManifest>) -> Result<PathBuf, SyncError> {
        if !self.source.is_dir() {
            return Err(SyncError::Validation(format!(
                "source folder {} does not exist",
                self.source.display()
            )));
        }
        let version = self
            .version
            .parse()
            .map_err(|e| SyncError::Validation(e.to_string()))?;
        if let Some(current) = current {
            let published = current
                .version
                .parse()
                .map_err(|e| SyncError::Validation(format!("published manifest: {e}")))?;
            if version <= published {
                return Err(SyncError::Validation(format!(
                    "version {} is not newer than published {}",
                    self.version, current.version
                )));
            }
        }

        let relative = self.relative_executable()?;
        if !self.source.join(&relative).is_file() {
            return Err(SyncError::Validation(format!(
                "executable {} not found in {}",
                relative.display(),
                self.source.display()
            )));
        }
        Ok(PathBuf::from(
            relative.to_string_lossy().replace('\\', "/"),
        ))
    }

    /// Resolve `source` (and an absolute `executable`) to canonical paths so
    /// every later step sees the same folder name and file keys.
    pub fn resolved(&self) -> Result<Self, SyncError> {
        if !self.source.is_dir() {
            return Err(SyncError::Validation(format!(
                "source folder {} does not exist",
                self.source.display()
            )));
        }
        let source = self
            .source
            .canonicalize()
            .map_err(|e| io_err(&self.source, e))?;
        let executable = if self.executable.is_absolute() {
            self.executable
                .canonicalize()
                .unwrap_or_else(|_| self.executable.clone())
        } else {
            self.executable.clone()
        };
        Ok(Self {
            source,
            executable,
            version: self.version.clone(),
        })
    }

    fn relative_executable(&self) -> Result<PathBuf, SyncError> {
        let relative = if self.executable.is_absolute() {
            self.executable
                .strip_prefix(&self.source)
                .map(Path::to_path_buf)
                .map_err(|_| {
                    SyncError::Validation(format!(
                        "executable {} is outside {}",
                        self.executable.display(),
                        self.source.display()
                    ))
                })?
        } else {
            self.executable.clone()
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SyncError::Validation(format!(
                "executable {} escapes the source folder",
                self.executable.display()
            )));
        }
        Ok(relative)
    }
}

/// What a successful publish produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub manifest: BuildManifest,
    /// Every uploaded artifact, manifest last.
    pub uploaded: Vec<ArtifactKey>,
    /// Version the uploaded patch upgrades from, if a patch was produced.
    pub patched_from: Option<BuildVersion>,
}

impl Session {
    /// Publish `request` as the new build of this game.
    pub fn publish(&self, request: &PublishRequest) -> Result<PublishReport, SyncError> {
        let _busy = self.busy.lock().unwrap_or_else(|p| p.into_inner());
        let current = self.try_fetch_manifest()?;
        let resolved = request.resolved()?;
        let request = &resolved;
        let executable = request.validate(current.as_ref())?;
        tracing::info!(
            game = %self.game,
            version = %request.version,
            previous = ?current.as_ref().map(|m| &m.version),
            "publishing"
        );

        let _temp = self.enter_temp();
        self.temp.ensure()?;

        let patch = match &current {
            Some(current) => self.diff_installed(current, request)?,
            None => None,
        };

        self.progress.step(Stage::Hashing);
        let hashes = integrity::hash(
            self.tools.digests.as_ref(),
            &request.source,
            true,
            &mut |p| self.progress.percent(Stage::Hashing, p),
        )?;
        let sizes = integrity::size(&request.source)?;

        self.progress.step(Stage::Compressing);
        let volumes = packager::package(
            self.tools.compressor.as_ref(),
            &self.temp,
            &request.version,
            &request.source,
            self.volume_size,
            &mut |p| self.progress.percent(Stage::Compressing, p),
        )?;

        let manifest = BuildManifest {
            game_name: self.game.clone(),
            version: request.version.clone(),
            executable,
            files: volumes.iter().map(|p| file_name(p)).collect(),
            hashes,
            sizes,
            from: patch
                .iter()
                .map(|(from, path)| (from.clone(), file_name(path)))
                .collect(),
            published_at: Some(Utc::now()),
        };
        manifest.validate()?;

        let mut artifacts: Vec<(PathBuf, ArtifactKey)> = volumes
            .iter()
            .chain(patch.as_ref().map(|(_, path)| path))
            .map(|path| {
                let name = file_name(path);
                (path.clone(), ArtifactKey::new(&self.game, &name))
            })
            .collect();

        self.progress.step(Stage::Uploading);
        let count = artifacts.len();
        for (index, (path, key)) in artifacts.iter().enumerate() {
            self.upload(path, key, index, count)?;
        }

        let manifest_key = ArtifactKey::manifest(&self.game);
        self.store
            .put_bytes(&manifest_key, &serde_json::to_vec_pretty(&manifest)?)?;
        tracing::info!(game = %self.game, version = %manifest.version, artifacts = count, "manifest published");

        state::update(&self.layout, &self.game, |s| {
            s.folder = Some(request.source.clone());
        })?;

        artifacts.push((PathBuf::new(), manifest_key));
        Ok(PublishReport {
            manifest,
            uploaded: artifacts.into_iter().map(|(_, key)| key).collect(),
            patched_from: patch.map(|(from, _)| from),
        })
    }

    /// Patch from the installed copy to `request.source`.
    ///
    /// Skipped unless the installed version is exactly the published one.
    fn diff_installed(
        &self,
        current: &BuildManifest,
        request: &PublishRequest,
    ) -> Result<Option<(BuildVersion, PathBuf)>, SyncError> {
        let local = state::load(&self.layout, &self.game)?;
        let tree = self.install_dir();
        if local.version.as_ref() != Some(&current.version) || !tree.is_dir() {
            tracing::warn!(
                game = %self.game,
                published = %current.version,
                installed = ?local.version,
                "installed copy is not the published build, skipping patch"
            );
            return Ok(None);
        }
        self.progress.step(Stage::Diffing);
        let path = patcher::diff(
            self.tools.differ.as_ref(),
            &self.temp,
            &tree,
            &request.source,
            &current.version,
            &request.version,
        )?;
        Ok(Some((current.version.clone(), path)))
    }

    fn upload(
        &self,
        path: &Path,
        key: &ArtifactKey,
        index: usize,
        count: usize,
    ) -> Result<(), SyncError> {
        tracing::info!(key = %key, index, count, "uploading");
        self.store.upload(path, key, &mut |transferred, total| {
            self.progress.emit(ProgressEvent::Transfer {
                direction: Direction::Upload,
                key: key.clone(),
                index,
                count,
                transferred,
                total,
            })
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    fn source() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Build");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin").join("game.exe"), "exe").unwrap();
        (tmp, root)
    }

    fn published(version: &str) -> BuildManifest {
        BuildManifest {
            game_name: "zomfi".into(),
            version: version.into(),
            executable: "bin/game.exe".into(),
            files: Vec::new(),
            hashes: BTreeMap::new(),
            sizes: BTreeMap::new(),
            from: BTreeMap::new(),
            published_at: None,
        }
    }

    fn request(source: &Path, exe: impl Into<PathBuf>, version: &str) -> PublishRequest {
        PublishRequest {
            source: source.to_path_buf(),
            executable: exe.into(),
            version: version.into(),
        }
    }

    #[test]
    fn same_version_is_rejected() {
        let (_tmp, root) = source();
        let err = request(&root, "bin/game.exe", "1.0.0")
            .validate(Some(&published("1.0.0")))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(m) if m.contains("not newer")));
    }

    #[test]
    fn newer_version_passes_and_normalizes_executable() {
        let (_tmp, root) = source();
        let exe = request(&root, root.join("bin").join("game.exe"), "1.0.1")
            .validate(Some(&published("1.0.0")))
            .unwrap();
        assert_eq!(exe, PathBuf::from("bin/game.exe"));
    }

    #[test]
    fn first_publish_needs_no_prior_manifest() {
        let (_tmp, root) = source();
        assert!(request(&root, "bin/game.exe", "0.1.0").validate(None).is_ok());
    }

    #[test]
    fn missing_executable_is_rejected() {
        let (_tmp, root) = source();
        let err = request(&root, "bin/missing.exe", "1.0.1")
            .validate(None)
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(m) if m.contains("not found")));
    }

    #[test]
    fn executable_cannot_escape_source() {
        let (_tmp, root) = source();
        let err = request(&root, "../game.exe", "1.0.1").validate(None).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn resolved_source_has_a_folder_name() {
        let (_tmp, root) = source();
        let dotted = root.join("bin").join("..");
        let resolved = request(&dotted, "bin/game.exe", "1.0.1").resolved().unwrap();
        assert_eq!(resolved.source.file_name(), root.canonicalize().unwrap().file_name());
        assert!(resolved.validate(None).is_ok());
    }

    #[test]
    fn resolving_missing_source_is_a_validation_error() {
        let tmp = TempDir::new().unwrap();
        let err = request(&tmp.path().join("nope"), "game.exe", "1.0.1")
            .resolved()
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn non_semver_version_is_rejected() {
        let (_tmp, root) = source();
        let err = request(&root, "bin/game.exe", "latest").validate(None).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
