//! Warden: keeps a working tree pushed to its remote and its services running.
//!
//! # Usage
//!
//! ```text
//! warden [--root <dir>] daemon start|stop|status [--json]|logs [-n N] [--service ID]
//! warden [--root <dir>] sync
//! warden [--root <dir>] pull
//! warden [--root <dir>] launch
//! warden [--root <dir>] start <service>
//! warden [--root <dir>] services [--json]
//! warden [--root <dir>] ports [--json]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{daemon::DaemonCommand, services::ListArgs, services::StartArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "warden",
    version,
    about = "Auto-sync a working tree with its git remote and supervise local services",
    long_about = None,
)]
struct Cli {
    /// Watch root holding `warden.yaml` (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run, stop or inspect the daemon for this root.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Push pending changes now and wait for the result.
    Sync,

    /// Pull from the remote now and wait for the result.
    Pull,

    /// Start every auto-start service whose dependencies are up.
    Launch,

    /// Start one service by id, resetting its restart budget.
    Start(StartArgs),

    /// List configured services and their state.
    Services(ListArgs),

    /// Show the port reservation table.
    Ports(ListArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = commands::resolve_root(cli.root)?;
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(&root, command),
        Commands::Sync => commands::sync::push(&root),
        Commands::Pull => commands::sync::pull(&root),
        Commands::Launch => commands::services::launch(&root),
        Commands::Start(args) => args.run(&root),
        Commands::Services(args) => commands::services::list_services(&root, &args),
        Commands::Ports(args) => commands::services::list_ports(&root, &args),
    }
}
