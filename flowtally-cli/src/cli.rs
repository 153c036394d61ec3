//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// flowtally -- passive XDP flow byte counter.
///
/// Use `flowtally <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "flowtally", version, about, long_about = None)]
pub struct Cli {
    /// Path to the flowtally.toml configuration file.
    #[arg(short, long, default_value = "flowtally.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach the XDP probe and print the flow table periodically (Linux only).
    Watch(WatchArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

// ---- watch ----

/// Attach the probe and report table snapshots until interrupted.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Override the network interface from the config file.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Override the snapshot interval in seconds.
    #[arg(long)]
    pub interval: Option<u64>,

    /// Stop after this many reports (default: run until Ctrl-C).
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Show only the N largest flows.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9100).
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,
}

// ---- config ----

/// Manage flowtally configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, probe).
        #[arg(long)]
        section: Option<String>,
    },
}
