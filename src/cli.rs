// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `scriptd`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scriptd",
    version,
    about = "Run automation scripts on demand, on a schedule, or when a device value changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the daemon config file (TOML).
    ///
    /// Relative paths inside the config are resolved against its directory.
    #[arg(long, value_name = "PATH", default_value = "scriptd.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SCRIPTD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load config, scripts and triggers, print them, and exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Run a single script once, print its execution record, and exit.
    #[arg(long, value_name = "SCRIPT")]
    pub run: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
