//! flowtally CLI entry point
//!
//! Parses arguments, initializes logging from the `[general]` section and
//! dispatches to the subcommand handlers.

mod cli;
mod commands;
mod error;
mod logging;
mod metrics_server;
mod output;

use clap::Parser;
use tracing::debug;

use flowtally_core::config::{FlowtallyConfig, GeneralConfig};

use cli::{Cli, Commands};
use error::CliError;
use output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging must come up before the command runs, even when the config
    // file is missing or invalid (`config validate` reports those itself).
    let mut general = FlowtallyConfig::load(&cli.config)
        .await
        .map(|config| config.general)
        .unwrap_or_else(|_| GeneralConfig::default());
    if let Some(level) = cli.log_level.clone() {
        general.log_level = level;
    }
    if let Err(e) = logging::init_tracing(&general) {
        eprintln!("warning: {e}");
    }

    debug!(config = %cli.config.display(), "flowtally starting");

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = run(cli, &writer).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    match cli.command {
        Commands::Watch(args) => commands::watch::execute(args, &cli.config, writer).await,
        Commands::Config(args) => commands::config::execute(args, &cli.config, writer).await,
    }
}
