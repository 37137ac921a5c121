//! Launcher configuration and on-disk layout.
//!
//! # Storage layout
//!
//! ```text
//! ~/.launchkit/
//!   config.yaml            (optional; defaults apply when absent)
//!   games/<game>/          (installed build tree)
//!   state/<game>.json      (local state record, mode 0600)
//!   temp/                  (session temp dir, purged around every operation)
//! ```
//!
//! As with the state store, every function touching the home directory has an
//! `_at(home, …)` form; tests must only call the `_at` variants.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, CoreError};
use crate::types::GameName;

/// Default archive volume size: 1 GiB.
pub const DEFAULT_VOLUME_SIZE: u64 = 1024 * 1024 * 1024;

/// Default capacity of the bounded progress channel.
pub const DEFAULT_PROGRESS_BUFFER: usize = 256;

/// Names or paths of the external tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub seven_zip: PathBuf,
    pub hdiff: PathBuf,
    pub hpatch: PathBuf,
    /// Hash with `seven_zip` instead of in-process.
    pub external_hashing: bool,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            seven_zip: PathBuf::from("7za"),
            hdiff: PathBuf::from("hdiffz"),
            hpatch: PathBuf::from("hpatchz"),
            external_hashing: false,
        }
    }
}

/// `~/.launchkit/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Base URL that artifact keys are appended to for downloads.
    pub base_url: String,
    /// Endpoint returning a short-lived signed upload URL for one key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_url: Option<String>,
    /// Bearer token presented to `sign_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Root for games, state and temp; defaults to `~/.launchkit`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub volume_size_bytes: u64,
    pub progress_buffer: usize,
    pub tools: ToolPaths,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            sign_url: None,
            auth_token: None,
            data_dir: None,
            volume_size_bytes: DEFAULT_VOLUME_SIZE,
            progress_buffer: DEFAULT_PROGRESS_BUFFER,
            tools: ToolPaths::default(),
        }
    }
}

/// `<home>/.launchkit`
pub fn launchkit_root(home: &Path) -> PathBuf {
    home.join(".launchkit")
}

/// `<home>/.launchkit/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    launchkit_root(home).join("config.yaml")
}

impl LauncherConfig {
    /// Load the config under `home`, falling back to defaults when the file is absent.
    pub fn load_at(home: &Path) -> Result<Self, CoreError> {
        let path = config_path_at(home);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_yaml::from_str(&contents).map_err(|source| CoreError::Config { path, source })
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_at(&home()?)
    }

    /// Resolve the on-disk layout for this config rooted at `home`.
    pub fn layout_at(&self, home: &Path) -> Layout {
        let root = self
            .data_dir
            .clone()
            .unwrap_or_else(|| launchkit_root(home));
        Layout::new(root)
    }
}

/// Every path the launcher reads or writes, derived from one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/games`
    pub fn games_dir(&self) -> PathBuf {
        self.root.join("games")
    }

    /// `<root>/games/<game>`, the installed build tree.
    pub fn game_dir(&self, game: &GameName) -> PathBuf {
        self.games_dir().join(&game.0)
    }

    /// `<root>/temp`, session-scoped scratch space for transfers.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// `<root>/state`
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    /// `<root>/state/<game>.json`
    pub fn state_path(&self, game: &GameName) -> PathBuf {
        self.state_dir().join(format!("{}.json", game.0))
    }
}

fn home() -> Result<PathBuf, CoreError> {
    dirs::home_dir().ok_or(CoreError::HomeNotFound)
}
