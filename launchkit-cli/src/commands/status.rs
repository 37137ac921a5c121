//! `launchkit status`: installed vs published versions.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use launchkit_sync::{
    pipeline::{self, Operation, Outcome},
    StatusReport, SyncState,
};

use super::{execute, version_or_dash, Env};

/// Arguments for `launchkit status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Game to check; prints a one-line summary unless `--json` is given.
    /// Omit to list every game with local state.
    pub game: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let env = Env::load()?;
        let games = match self.game {
            Some(game) if !self.json => return execute(&game, Operation::Status),
            Some(game) => vec![game],
            None => known_games(&env.layout().state_dir())?,
        };

        let mut reports = Vec::with_capacity(games.len());
        for game in &games {
            reports.push(report(&env, game)?);
        }

        if self.json {
            let payload = StatusJson { games: reports };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(reports);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusJson {
    games: Vec<StatusReport>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "game")]
    game: String,
    #[tabled(rename = "installed")]
    installed: String,
    #[tabled(rename = "published")]
    published: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "location")]
    location: String,
}

fn report(env: &Env, game: &str) -> Result<StatusReport> {
    let outcome = pipeline::run(&env.session(game), Operation::Status)
        .with_context(|| format!("status check failed for '{game}'"))?;
    match outcome {
        Outcome::Status(report) => Ok(report),
        other => bail!("unexpected outcome for status of '{game}': {other:?}"),
    }
}

/// Names of every game with a local state record, sorted.
fn known_games(state_dir: &Path) -> Result<Vec<String>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir)
        .with_context(|| format!("failed to read {}", state_dir.display()))?;
    let mut games: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    games.sort();
    Ok(games)
}

fn print_table(reports: Vec<StatusReport>) {
    println!(
        "launchkit v{} | {} games | {} need attention",
        env!("CARGO_PKG_VERSION"),
        reports.len(),
        reports
            .iter()
            .filter(|r| r.state != SyncState::UpToDate)
            .count(),
    );
    if reports.is_empty() {
        println!("No games installed.");
        return;
    }

    let rows: Vec<StatusTableRow> = reports
        .into_iter()
        .map(|r| StatusTableRow {
            game: r.game.to_string(),
            installed: version_or_dash(r.installed.as_ref()),
            published: version_or_dash(r.published.as_ref()),
            status: state_label(r.state),
            location: r.install_dir.display().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn state_label(state: SyncState) -> String {
    let label = state.to_string().to_uppercase();
    match state {
        SyncState::UpToDate => label.green().bold().to_string(),
        SyncState::NeedsPatch | SyncState::NeedsFullUpdate => label.yellow().bold().to_string(),
        SyncState::NeedsInstall => label.bright_black().bold().to_string(),
        SyncState::Verifying | SyncState::Repairing => label.cyan().bold().to_string(),
        SyncState::Unknown => label.red().bold().to_string(),
    }
}
