//! `launchkit publish`: package and upload a new build.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use launchkit_core::{state, GameName};
use launchkit_sync::{Operation, PublishRequest};

use super::Env;

/// Arguments for `launchkit publish`.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Game to publish.
    pub game: String,

    /// Version of the new build; must be newer than the published one.
    #[arg(long)]
    pub version: String,

    /// Executable path relative to the build folder.
    #[arg(long)]
    pub executable: PathBuf,

    /// Folder holding the new build. Defaults to the folder last published from.
    #[arg(long)]
    pub folder: Option<PathBuf>,
}

impl PublishArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        let folder = match self.folder {
            Some(folder) => folder,
            None => state::load(&env.layout(), &GameName::from(self.game.as_str()))
                .context("failed to read local state")?
                .folder
                .with_context(|| {
                    format!("no --folder given and none remembered for '{}'", self.game)
                })?,
        };
        let source = if folder.is_absolute() {
            folder
        } else {
            std::env::current_dir()
                .context("could not determine current directory")?
                .join(folder)
        };

        let request = PublishRequest {
            source,
            executable: self.executable,
            version: self.version.into(),
        };
        super::execute(&self.game, Operation::Publish(request))
    }
}
