//! launchkit core library: domain types, configuration, local state persistence, errors.
//!
//! - [`types`]: newtypes, the remote [`BuildManifest`] and persisted [`LocalState`]
//! - [`config`]: [`LauncherConfig`] and the on-disk [`Layout`]
//! - [`state`]: load / save / remove of per-game local state
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::{LauncherConfig, Layout, ToolPaths};
pub use error::CoreError;
pub use types::{
    ArtifactKey, BuildManifest, BuildVersion, Direction, GameName, LocalState, TransferTask,
};
