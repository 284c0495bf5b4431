// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stagechain`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stagechain",
    version,
    about = "Drive chained solver stages (reduction, dynamic solve, recovery).",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the model/config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Stagechain.toml")]
    pub config: String,

    /// Unattended execution: exit when all tasks are done, abort on the
    /// first failure and run the configured auto-exports on success.
    #[arg(long)]
    pub batch: bool,

    /// Override `[config].max_concurrent_processes`.
    #[arg(long, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STAGECHAIN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the model and requests, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the input files of every requested stage and its missing
    /// prerequisites for a later batch run, without starting any process.
    #[arg(long, conflicts_with = "dry_run")]
    pub prepare_batch: bool,

    /// Tasks to run, as `kind[:event[:part]]`, e.g. `solve:ev1`,
    /// `stress:ev1:bracket` or `reduce::bracket`.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,
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
