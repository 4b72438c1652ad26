//! timer-extension: the rendering-extension side of the ambient timer.
//!
//! Invoked by the host each time it needs a frame or the user taps a control.
//! It never mutates the timer: it reads the published record and writes
//! relay actions for the main process to apply.
//!
//! ## Subcommands
//!
//! - `render`: Print the current surface view (optimistic while an action is pending)
//! - `action`: Record a pause/resume/stop request in the relay slot
//! - `decode`: Diagnose a timer state payload (file or stdin)

mod action;
mod decode;
mod logging;
mod render;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timer_core::ContainerPaths;
use timer_protocol::ActionKind;

#[derive(Parser)]
#[command(name = "timer-extension")]
#[command(about = "Ambient timer rendering extension")]
#[command(version)]
struct Cli {
    /// Shared container root (defaults to $AMBIENT_TIMER_CONTAINER or ~/.ambient-timer/group)
    #[arg(long, global = true, value_name = "DIR")]
    container: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current surface view
    Render {
        /// Emit JSON instead of a single display line
        #[arg(long)]
        json: bool,
    },

    /// Request a control action from the main process
    Action {
        /// pause, resume, or stop
        #[arg(value_name = "KIND")]
        kind: ActionKind,

        /// Target activity (defaults to the one currently published)
        #[arg(long)]
        activity_id: Option<String>,

        /// Timer kind the action is routed to
        #[arg(long, default_value = timer_protocol::DEFAULT_TIMER_KIND)]
        timer_kind: String,
    },

    /// Decode a timer state payload and report which generation matched
    Decode {
        /// Payload file (reads stdin when omitted)
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let paths = cli
        .container
        .map(ContainerPaths::with_root)
        .or_else(ContainerPaths::from_env);
    let _logging_guard = logging::init(paths.as_ref());

    match cli.command {
        Commands::Render { json } => {
            // Rendering never fails the host: the fallback is the empty view.
            render::run(paths.as_ref(), json);
        }
        Commands::Action {
            kind,
            activity_id,
            timer_kind,
        } => {
            if let Err(e) = action::run(paths.as_ref(), kind, activity_id.as_deref(), &timer_kind) {
                tracing::error!(error = %e, "timer-extension action failed");
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        Commands::Decode { path } => {
            if let Err(e) = decode::run(path.as_deref()) {
                tracing::warn!(error = %e, "timer-extension decode failed");
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
    }
}
