//! `launchkit play`: launch an installed game.

use anyhow::{bail, Context, Result};
use clap::Args;

/// Arguments for `launchkit play`.
#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Game to launch.
    pub game: String,

    /// Return as soon as the game has started.
    #[arg(long)]
    pub detach: bool,

    /// Arguments passed through to the game executable.
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl PlayArgs {
    pub fn run(self) -> Result<()> {
        let game = self.game.as_str();
        let mut child = super::with_session(game, |session| {
            session
                .launch(&self.args)
                .with_context(|| format!("failed to launch '{game}'"))
        })?;

        if self.detach {
            println!("✓ '{game}' started (pid {})", child.id());
            return Ok(());
        }
        let status = child
            .wait()
            .with_context(|| format!("failed to wait for '{game}'"))?;
        if !status.success() {
            bail!("'{game}' exited with {status}");
        }
        Ok(())
    }
}
