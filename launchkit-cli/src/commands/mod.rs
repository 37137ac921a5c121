//! Subcommand implementations and the plumbing they share.

pub mod play;
pub mod publish;
pub mod repair;
pub mod status;
pub mod sync;
pub mod uninstall;

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use launchkit_core::{LauncherConfig, Layout};
use launchkit_sync::{
    pipeline::{self, Operation, Outcome},
    progress, ProgressEvent, ProgressReceiver, RepairOutcome, Session, SyncOutcome,
};

/// Home directory plus the config loaded from it.
pub(crate) struct Env {
    pub home: PathBuf,
    pub config: LauncherConfig,
}

impl Env {
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let config = LauncherConfig::load_at(&home).context("failed to load launcher config")?;
        Ok(Self { home, config })
    }

    pub fn layout(&self) -> Layout {
        self.config.layout_at(&self.home)
    }

    pub fn session(&self, game: &str) -> Session {
        Session::from_config(game, &self.config, &self.home)
    }
}

/// Run `f` against a session for `game` while a background thread prints
/// its progress to stderr.
pub(crate) fn with_session<T>(game: &str, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
    let env = Env::load()?;
    let (sink, rx) = progress::channel(env.config.progress_buffer);
    let printer = std::thread::spawn(move || print_progress(rx));
    let session = env.session(game).with_progress(sink);
    let result = f(&session);
    // Dropping the session closes the channel and ends the printer.
    drop(session);
    let _ = printer.join();
    result
}

/// Run one pipeline operation for `game` and report its outcome.
pub(crate) fn execute(game: &str, op: Operation) -> Result<()> {
    let verb = match &op {
        Operation::Status => "status",
        Operation::Sync => "sync",
        Operation::Repair => "repair",
        Operation::Uninstall => "uninstall",
        Operation::Publish(_) => "publish",
    };
    let outcome = with_session(game, |session| {
        pipeline::run(session, op).with_context(|| format!("{verb} failed for '{game}'"))
    })?;
    print_outcome(game, &outcome);
    Ok(())
}

fn print_outcome(game: &str, outcome: &Outcome) {
    let ok = "✓".green().bold();
    match outcome {
        Outcome::Status(report) => println!(
            "{game}: {} (installed {}, published {})",
            report.state,
            version_or_dash(report.installed.as_ref()),
            version_or_dash(report.published.as_ref()),
        ),
        Outcome::Synced(SyncOutcome::Installed { version }) => {
            println!("{ok} '{game}' installed {version}")
        }
        Outcome::Synced(SyncOutcome::Patched { from, to }) => {
            println!("{ok} '{game}' patched {from} → {to}")
        }
        Outcome::Synced(SyncOutcome::Updated { from, to }) => {
            println!("{ok} '{game}' updated {from} → {to} (full download)")
        }
        Outcome::Synced(SyncOutcome::UpToDate { version }) => {
            println!("{ok} '{game}' is up to date ({version})")
        }
        Outcome::Repair(RepairOutcome::AlreadyRunning) => {
            println!("· a repair of '{game}' is already running")
        }
        Outcome::Repair(RepairOutcome::Skipped { state }) => println!(
            "{} '{game}' is not up to date ({state}); run 'launchkit sync {game}' first",
            "!".yellow().bold()
        ),
        Outcome::Repair(RepairOutcome::Clean { version }) => {
            println!("{ok} '{game}' {version} verified, no problems found")
        }
        Outcome::Repair(RepairOutcome::Repaired { version, report }) => {
            println!("{ok} '{game}' {version} repaired ({})", report.summary())
        }
        Outcome::Uninstalled => println!("{ok} '{game}' uninstalled"),
        Outcome::Published(report) => {
            println!(
                "{ok} '{game}' {} published ({} artifacts)",
                report.manifest.version,
                report.uploaded.len()
            );
            if let Some(from) = &report.patched_from {
                println!("  patch from {from} included");
            }
            for key in &report.uploaded {
                println!("  ↑  {key}");
            }
        }
    }
}

pub(crate) fn version_or_dash<T: std::fmt::Display>(v: Option<&T>) -> String {
    v.map(ToString::to_string).unwrap_or_else(|| "-".to_string())
}

/// Print state changes, steps, and progress in 10% increments.
fn print_progress(mut rx: ProgressReceiver) {
    let mut last: Option<(String, u32)> = None;
    while let Some(event) = rx.blocking_recv() {
        let label = match &event {
            ProgressEvent::State(state) => {
                eprintln!("{} {state}", "→".cyan());
                continue;
            }
            ProgressEvent::Step { stage } => {
                eprintln!("  {stage}…");
                continue;
            }
            ProgressEvent::Percent { stage, .. } => stage.to_string(),
            ProgressEvent::Transfer { direction, key, .. } => format!("{direction} {key}"),
        };
        let Some(percent) = event.overall_percent() else {
            continue;
        };
        let decile = (percent / 10.0) as u32;
        if last.as_ref() != Some(&(label.clone(), decile)) {
            eprintln!("  {label} {:>3.0}%", percent);
            last = Some((label, decile));
        }
    }
}
