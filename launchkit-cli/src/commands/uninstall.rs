//! `launchkit uninstall`

use anyhow::Result;
use clap::Args;
use launchkit_sync::Operation;

/// Arguments for `launchkit uninstall`.
#[derive(Args, Debug)]
pub struct UninstallArgs {
    /// Game to remove.
    pub game: String,
}

impl UninstallArgs {
    pub fn run(self) -> Result<()> {
        super::execute(&self.game, Operation::Uninstall)
    }
}
