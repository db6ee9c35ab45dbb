//! cc-hook: entry point for assistant hooks and session lifecycle.
//!
//! Called directly by hooks configured in ~/.claude/settings.json, and by
//! the user (or a wrapper script) to start and stop a session's server.
//!
//! ## Subcommands
//!
//! - `handle`: Submit a hook event (reads JSON from stdin)
//! - `launch`: Start or reuse a server and print shell exports
//! - `run`: Start a server, run a command against it, then shut it down
//! - `shutdown`: Drain and stop a session's server
//! - `sweep`: Reclaim sessions whose owner has exited
//! - `status`: Print registered sessions as JSON

mod handle;
mod lifecycle;
mod logging;

use cc_hooks_core::SessionOverrides;
use clap::{Parser, Subcommand};
use lifecycle::Context;

#[derive(Parser)]
#[command(name = "cc-hook")]
#[command(about = "Audio and TTS hooks for assistant sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a hook event (reads JSON from stdin)
    Handle {
        /// Per-event arguments as --key=value or --flag
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Start (or reuse) a server for a session and print shell exports
    Launch {
        /// Session identifier; generated when omitted
        #[arg(long)]
        session_id: Option<String>,

        /// Owning assistant process; detected from the process tree when omitted
        #[arg(long)]
        owner_pid: Option<u32>,

        #[command(flatten)]
        overrides: SessionOverrides,
    },

    /// Run a command with a dedicated server, shutting it down afterwards
    Run {
        #[command(flatten)]
        overrides: SessionOverrides,

        /// Command and arguments to run
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Drain and stop the server for a session
    Shutdown {
        #[arg(long)]
        session_id: String,

        /// Seconds to wait for queued events before stopping anyway
        #[arg(long)]
        max_wait: Option<u64>,
    },

    /// Stop servers whose owner has exited and drop their sessions
    Sweep,

    /// Print registered sessions as JSON
    Status,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Handle { args } => match handle::run(&args) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "cc-hook handle failed");
                1
            }
        },
        command => match Context::load() {
            Ok(ctx) => run_command(&ctx, command),
            Err(e) => {
                tracing::error!(error = %e, "Failed to open cc-hooks state");
                1
            }
        },
    };
    std::process::exit(code);
}

fn run_command(ctx: &Context, command: Commands) -> i32 {
    match command {
        Commands::Handle { .. } => 1,
        Commands::Launch {
            session_id,
            owner_pid,
            overrides,
        } => match lifecycle::launch(ctx, session_id, owner_pid, &overrides) {
            Ok(acquired) => {
                print!("{}", lifecycle::exports(&acquired));
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "cc-hook launch failed");
                1
            }
        },
        Commands::Run { overrides, command } => match lifecycle::run(ctx, &command, &overrides) {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "cc-hook run failed");
                1
            }
        },
        Commands::Shutdown {
            session_id,
            max_wait,
        } => match lifecycle::shutdown(ctx, &session_id, max_wait) {
            Ok(Some(report)) => {
                lifecycle::log_report(&report);
                0
            }
            Ok(None) => {
                tracing::warn!(session = %session_id, "No such session");
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "cc-hook shutdown failed");
                1
            }
        },
        Commands::Sweep => match lifecycle::sweep(ctx) {
            Ok(removed) => {
                tracing::info!(count = removed.len(), "Sweep finished");
                for session in removed {
                    println!("{}", session);
                }
                0
            }
            Err(e) => {
                tracing::error!(error = %e, "cc-hook sweep failed");
                1
            }
        },
        Commands::Status => match lifecycle::status(ctx) {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(text) => {
                    println!("{}", text);
                    0
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode status");
                    1
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "cc-hook status failed");
                1
            }
        },
    }
}
