//! CLI argument definitions
//!
//! All Clap derive structs for `trialsync` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::config::DisplayConfig;
use crate::observability::LogFormat;

// ============================================================================
// Root CLI
// ============================================================================

/// Multi-phase trial runner with cross-loop synchronization.
#[derive(Parser, Debug)]
#[command(name = "trialsync", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "TRIALSYNC_COLOR")]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(long, default_value = "human", global = true, env = "TRIALSYNC_LOG_FORMAT")]
    pub log_format: LogFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a protocol with the dual-loop driver.
    Run(RunArgs),

    /// Validate protocol files without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the YAML protocol file.
    #[arg(short, long, env = "TRIALSYNC_CONFIG")]
    pub config: PathBuf,

    /// Number of trials, overriding `experiment.trials`.
    #[arg(short = 'n', long)]
    pub trials: Option<u32>,

    /// Answer manual phases automatically after this delay (e.g. `300ms`).
    #[arg(long, value_parser = humantime::parse_duration)]
    pub auto_respond: Option<std::time::Duration>,

    /// Display refresh rate, overriding `display.refresh_hz`.
    #[arg(long, value_parser = parse_refresh_hz)]
    pub refresh_hz: Option<f64>,

    /// Write the JSONL event stream to this file instead of stderr.
    #[arg(long, env = "TRIALSYNC_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "TRIALSYNC_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Protocol files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Accepts the same refresh rates a protocol file may declare.
fn parse_refresh_hz(raw: &str) -> Result<f64, String> {
    let refresh_hz: f64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid refresh rate '{raw}': {e}"))?;
    DisplayConfig { refresh_hz }.frame_interval()?;
    Ok(refresh_hz)
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
