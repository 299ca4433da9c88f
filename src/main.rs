mod app;

use anyhow::Result;
use app::cli::Cli;
use clap::Parser;
use std::process::ExitCode;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Hidden flag: spawned by the bridge as a session worker.
    if cli.internal_session_worker {
        return app::commands::run_worker(cli.config.as_deref());
    }

    app::commands::run_controller(cli)
}
