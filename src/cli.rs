// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `streamdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "streamdag",
    version,
    about = "Run a dependency-ordered, streaming data pipeline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    ///
    /// Default: `Streamdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Streamdag.toml")]
    pub config: String,

    /// Override `[config].max_workers`.
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STREAMDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the pipeline plan, but don't run any task.
    #[arg(long)]
    pub dry_run: bool,
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
