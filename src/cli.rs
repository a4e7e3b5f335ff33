// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Decompose a request into a task DAG and run it with bounded parallelism.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// A missing file is not an error when it is the default path; the
    /// built-in catalog and defaults are used instead.
    #[arg(long, value_name = "PATH", default_value = "Flowdag.toml")]
    pub config: String,

    /// Topic of the work to decompose.
    #[arg(long, value_name = "TEXT")]
    pub topic: String,

    /// Key point to cover (repeatable, order is preserved).
    #[arg(long = "key-point", value_name = "TEXT")]
    pub key_points: Vec<String>,

    /// Free-form preference as `key=value` (repeatable).
    ///
    /// Values are parsed as JSON when possible (`maxRetries=2`), otherwise
    /// kept as strings (`tone=formal`).
    #[arg(long = "pref", value_name = "KEY=VALUE", value_parser = parse_preference)]
    pub preferences: Vec<(String, serde_json::Value)>,

    /// Use the built-in echo provider for capabilities that have no
    /// `[capability.<name>]` entry.
    #[arg(long)]
    pub echo_missing: bool,

    /// How often to poll workflow status while it runs (milliseconds).
    #[arg(long, value_name = "MS", default_value_t = 250)]
    pub poll_ms: u64,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Decompose and print the task graph with estimates, but don't execute.
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

fn parse_preference(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid preference '{raw}' (expected KEY=VALUE)"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid preference '{raw}' (empty key)"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}
