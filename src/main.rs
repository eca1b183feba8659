mod cli;
mod commands;
mod error;
mod present;

use crate::cli::Cli;
use crate::commands::App;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use lectern_config::Settings;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

/// Load, run the command, persist. The snapshot is written even when the
/// command fails part-way, since files may already have moved.
fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let interactive = settings.interactive && !cli.yes;
    let mut app = App::open(settings, interactive)?;
    let modifies = cli.command.modifies_catalog();
    let outcome = app.run(cli.command);
    if modifies {
        app.persist()?;
    }
    outcome
}
