//! beacon-hook: one-shot recorder for agent session events.
//!
//! Invoked by agent CLI hooks (JSON on stdin), records the event in
//! `~/.beacon/sessions.json` and exits. Stdout and stderr belong to the
//! calling tool, so logs go to a daily file under `~/.beacon/logs/`.
//!
//! ## Subcommands
//!
//! - `handle`: Agent hook payload (`hook_event_name`, `session_id`, ...)
//! - `emit`: One `beacon/1` protocol event from a hookless tool

mod emit;
mod error;
mod handle;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beacon-hook")]
#[command(about = "Records coding-agent session events for Beacon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle an agent hook event (reads JSON from stdin)
    Handle,

    /// Record a protocol event (reads JSON from stdin)
    Emit,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Handle => handle::run(),
        Commands::Emit => emit::run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "beacon-hook failed");
        std::process::exit(1);
    }
}
