//! Kitsunari - watch anime in mpv and pick up where you left off
//!
//! # Usage
//!
//! ```bash
//! # List titles to continue
//! kitsunari
//!
//! # Search, play, resume
//! kitsunari search "frieren"
//! kitsunari play <ID> 1
//! kitsunari resume <ID> --json
//! ```

use clap::Parser;

use kitsunari::app::App;
use kitsunari::cli::{Cli, Command, ContinueCmd, ExitCode, Output};
use kitsunari::{commands, logging};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        // Logging is best effort; the commands still work without it
        if !cli.quiet {
            eprintln!("Warning: {:#}", e);
        }
    }

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let mut app = match App::load(cli.config.clone()) {
        Ok(app) => app,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::Error),
    };
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting");

    match cli.command {
        Some(Command::Search(cmd)) => commands::search_cmd(cmd, &app, &output).await,

        Some(Command::Episodes(cmd)) => commands::episodes_cmd(cmd, &app, &output).await,

        Some(Command::Streams(cmd)) => commands::streams_cmd(cmd, &app, &output).await,

        Some(Command::Play(cmd)) => commands::play_cmd(cmd, &app, &output).await,

        Some(Command::Resume(cmd)) => commands::resume_cmd(cmd, &app, &output).await,

        Some(Command::Continue(cmd)) => commands::continue_cmd(cmd, &app, &output).await,

        Some(Command::History(cmd)) => commands::history_cmd(cmd, &app, &output).await,

        Some(Command::Forget(cmd)) => commands::forget_cmd(cmd, &app, &output).await,

        Some(Command::Config(cmd)) => commands::config_cmd(cmd, &mut app, &output).await,

        None => commands::continue_cmd(ContinueCmd::default(), &app, &output).await,
    }
}
