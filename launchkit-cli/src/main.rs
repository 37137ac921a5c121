//! launchkit: install, update, repair and publish game builds.
//!
//! # Usage
//!
//! ```text
//! launchkit status [<game>] [--json]
//! launchkit sync <game>
//! launchkit repair <game>
//! launchkit play <game> [-- <args>...]
//! launchkit uninstall <game>
//! launchkit publish <game> --version <v> --executable <path> [--folder <dir>]
//! ```
//!
//! Global flags: `--verbose` for debug logs, `--json-logs` for JSON log lines
//! on stderr. `RUST_LOG` overrides both.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    play::PlayArgs, publish::PublishArgs, repair::RepairArgs, status::StatusArgs,
    sync::SyncArgs, uninstall::UninstallArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "launchkit",
    version,
    about = "Keep installed game builds in step with their published releases",
    long_about = None,
)]
struct Cli {
    /// Log debug detail to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show installed and published versions.
    Status(StatusArgs),

    /// Install, patch or update a game to its published build.
    Sync(SyncArgs),

    /// Verify an installed build and reinstall it if anything differs.
    Repair(RepairArgs),

    /// Launch a game, repairing it first if its files look wrong.
    Play(PlayArgs),

    /// Remove an installed game and its local state.
    Uninstall(UninstallArgs),

    /// Package, upload and publish a new build of a game.
    Publish(PublishArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);
    tracing::debug!(command = ?cli.command, "dispatching");
    match cli.command {
        Commands::Status(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Repair(args) => args.run(),
        Commands::Play(args) => args.run(),
        Commands::Uninstall(args) => args.run(),
        Commands::Publish(args) => args.run(),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
