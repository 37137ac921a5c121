//! Domain types for builds, manifests and installed state.
//!
//! All path fields use `PathBuf`; manifest maps are `BTreeMap` so that a
//! serialized manifest is byte-stable for identical inputs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// File name of the manifest under a game's storage prefix.
pub const MANIFEST_FILE: &str = "manifest.json";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed game name; also the storage prefix for its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GameName(pub String);

impl fmt::Display for GameName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for GameName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GameName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A build version string as published in a manifest.
///
/// Equality is textual; ordering for publish checks goes through [`BuildVersion::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildVersion(pub String);

impl BuildVersion {
    /// Parse as a semantic version.
    pub fn parse(&self) -> Result<semver::Version, CoreError> {
        semver::Version::parse(self.0.trim()).map_err(|source| CoreError::InvalidVersion {
            version: self.0.clone(),
            source,
        })
    }

    /// `true` when `self` is strictly newer than `other` under semver ordering.
    pub fn is_newer_than(&self, other: &BuildVersion) -> Result<bool, CoreError> {
        Ok(self.parse()? > other.parse()?)
    }

    /// Version with every non-alphanumeric character replaced by `_`, for use in file names.
    pub fn sanitized(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for BuildVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BuildVersion {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// An opaque storage key, always of the form `<game>/<file name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey(pub String);

impl ArtifactKey {
    /// Key for `file_name` under the storage prefix of `game`.
    ///
    /// Any directory part of `file_name` (either separator) is dropped.
    pub fn new(game: &GameName, file_name: &str) -> Self {
        let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
        Self(format!("{}/{}", game.0, base))
    }

    /// Key of the manifest document for `game`.
    pub fn manifest(game: &GameName) -> Self {
        Self::new(game, MANIFEST_FILE)
    }

    /// The last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Remote descriptor of the latest published build of a game.
///
/// Fetched fresh for every session and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    pub game_name: GameName,
    pub version: BuildVersion,
    /// Executable path relative to the installed tree.
    pub executable: PathBuf,
    /// Archive volume file names, in extraction order.
    #[serde(default)]
    pub files: Vec<String>,
    /// Relative path -> lowercase SHA-256 hex digest.
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Relative path -> size in bytes.
    #[serde(default)]
    pub sizes: BTreeMap<String, u64>,
    /// Prior version -> patch file name that upgrades it to `version`.
    #[serde(default)]
    pub from: BTreeMap<BuildVersion, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl BuildManifest {
    /// Storage keys of every archive volume, in order.
    pub fn volume_keys(&self) -> Vec<ArtifactKey> {
        self.files
            .iter()
            .map(|f| ArtifactKey::new(&self.game_name, f))
            .collect()
    }

    /// Storage key of the patch that upgrades `installed` to this build, if one was published.
    pub fn patch_for(&self, installed: &BuildVersion) -> Option<ArtifactKey> {
        self.from
            .get(installed)
            .map(|f| ArtifactKey::new(&self.game_name, f))
    }

    /// Check the structural invariants of a fetched manifest.
    ///
    /// `hashes` and `sizes` must share one key domain and every digest must be
    /// 64 hex characters.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.version.0.trim().is_empty() {
            return Err(CoreError::InvalidManifest("empty version".into()));
        }
        if !self.hashes.keys().eq(self.sizes.keys()) {
            return Err(CoreError::InvalidManifest(format!(
                "hashes ({}) and sizes ({}) describe different file sets",
                self.hashes.len(),
                self.sizes.len()
            )));
        }
        if let Some((path, _)) = self
            .hashes
            .iter()
            .find(|(_, digest)| !is_sha256_hex(digest))
        {
            return Err(CoreError::InvalidManifest(format!(
                "malformed digest for '{path}'"
            )));
        }
        Ok(())
    }

    /// Sum of all file sizes in the build.
    pub fn total_size(&self) -> u64 {
        self.sizes.values().sum()
    }
}

/// `true` for a 64-character hex string.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Local state
// ---------------------------------------------------------------------------

/// Persisted record of what is installed for one game.
///
/// `version == None` means "not installed".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocalState {
    pub version: Option<BuildVersion>,
    pub executable: Option<PathBuf>,
    /// Source folder last used to publish this game from this machine.
    pub folder: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocalState {
    pub fn is_installed(&self) -> bool {
        self.version.is_some()
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Direction of a single artifact transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Byte progress of one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub artifact: ArtifactKey,
    pub direction: Direction,
    pub bytes_total: u64,
    pub bytes_transferred: u64,
}

impl TransferTask {
    pub fn new(artifact: ArtifactKey, direction: Direction, bytes_total: u64) -> Self {
        Self {
            artifact,
            direction,
            bytes_total,
            bytes_transferred: 0,
        }
    }

    /// Record `n` more bytes, saturating at `bytes_total` when the total is known.
    pub fn advance(&mut self, n: u64) {
        let next = self.bytes_transferred.saturating_add(n);
        self.bytes_transferred = if self.bytes_total > 0 {
            next.min(self.bytes_total)
        } else {
            next
        };
    }

    /// Completed fraction in `[0, 1]`; `0` while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / self.bytes_total as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(GameName::from("Zomfi").to_string(), "Zomfi");
        assert_eq!(BuildVersion::from("1.0.1").to_string(), "1.0.1");
    }

    #[test]
    fn sanitized_replaces_every_separator() {
        assert_eq!(BuildVersion::from("1.10.2-rc.1").sanitized(), "1_10_2_rc_1");
    }

    #[test]
    fn artifact_key_strips_directories() {
        let game = GameName::from("Zomfi");
        assert_eq!(
            ArtifactKey::new(&game, r"C:\temp\Game_1_0_0.7z.001").0,
            "Zomfi/Game_1_0_0.7z.001"
        );
        assert_eq!(ArtifactKey::new(&game, "/tmp/x/PATCH.bin").0, "Zomfi/PATCH.bin");
        assert_eq!(ArtifactKey::manifest(&game).0, "Zomfi/manifest.json");
        assert_eq!(ArtifactKey::manifest(&game).file_name(), "manifest.json");
    }

    #[test]
    fn manifest_uses_wire_field_names() {
        let json = r#"{
            "gameName": "Zomfi",
            "version": "1.0.1",
            "executable": "bin/game.exe",
            "files": ["Game_1_0_1.7z.001"],
            "hashes": {},
            "sizes": {},
            "from": {"1.0.0": "PATCH_1_0_0_TO_1_0_1.bin"}
        }"#;
        let m: BuildManifest = serde_json::from_str(json).expect("parse");
        assert_eq!(m.game_name, GameName::from("Zomfi"));
        assert_eq!(
            m.patch_for(&BuildVersion::from("1.0.0")),
            Some(ArtifactKey("Zomfi/PATCH_1_0_0_TO_1_0_1.bin".into()))
        );
        let out = serde_json::to_string(&m).expect("serialize");
        assert!(out.contains("\"gameName\""));
        assert!(!out.contains("publishedAt"));
    }

    #[test]
    fn validate_rejects_mismatched_domains() {
        let mut m = BuildManifest {
            game_name: GameName::from("g"),
            version: BuildVersion::from("1.0.0"),
            executable: PathBuf::from("g.exe"),
            files: vec![],
            hashes: BTreeMap::new(),
            sizes: BTreeMap::new(),
            from: BTreeMap::new(),
            published_at: None,
        };
        m.hashes.insert("a".into(), "0".repeat(64));
        assert!(m.validate().is_err());
        m.sizes.insert("a".into(), 1);
        assert!(m.validate().is_ok());
        m.hashes.insert("a".into(), "xyz".into());
        assert!(m.validate().is_err());
    }

    #[test]
    fn transfer_task_saturates() {
        let mut t = TransferTask::new(ArtifactKey("g/a".into()), Direction::Download, 10);
        t.advance(4);
        assert!((t.fraction() - 0.4).abs() < f64::EPSILON);
        t.advance(100);
        assert_eq!(t.bytes_transferred, 10);
    }
}
