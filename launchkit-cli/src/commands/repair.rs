//! `launchkit repair`: verify an installed build against its manifest.

use anyhow::Result;
use clap::Args;
use launchkit_sync::Operation;

/// Arguments for `launchkit repair`.
#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Game to verify.
    pub game: String,
}

impl RepairArgs {
    pub fn run(self) -> Result<()> {
        super::execute(&self.game, Operation::Repair)
    }
}
