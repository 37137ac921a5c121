//! `launchkit sync`: bring a game to its published build.

use anyhow::Result;
use clap::Args;
use launchkit_sync::Operation;

/// Arguments for `launchkit sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Game to install or update.
    pub game: String,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        super::execute(&self.game, Operation::Sync)
    }
}
