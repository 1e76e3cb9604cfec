//! Clap derive structures for the `buson` CLI.
//!
//! Kept free of crate dependencies so `build.rs` can include it to
//! render man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// buson -- bus terminal link to the dispatch server
#[derive(Debug, Parser)]
#[command(
    name = "buson",
    version,
    about = "Connect a bus terminal to the buson dispatch server",
    long_about = "Runs the device side of the buson dispatch link: announces the\n\
        device, streams telemetry, and reacts to ride and drop requests.\n\n\
        The link reconnects on its own and re-reads the config file on every\n\
        attempt, so edits apply without a restart.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file path (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "BUSON_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "BUSON_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the terminal until interrupted
    Run(RunArgs),

    /// Manage the device configuration
    #[command(alias = "cfg")]
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Do not install the standard ride/drop/cancel/reset handlers
    #[arg(long)]
    pub no_default_handlers: bool,

    /// Ignore standard input (no local door/reset/ride inputs)
    #[arg(long)]
    pub no_stdin: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create the config file with guided setup
    Init,

    /// Display the resolved configuration
    Show,

    /// Print the config file path
    Path,

    /// Set a configuration value
    Set {
        /// Config key (e.g., "server_ip", "link.reconnect_delay_ms")
        key: String,

        /// Value to set
        value: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
