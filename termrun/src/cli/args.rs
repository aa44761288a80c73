//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// termrun - run a command and stream its output chunk by chunk
#[derive(Parser, Debug)]
#[command(name = "termrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Environment variable for the child (repeatable). Any use replaces
    /// the inherited environment entirely.
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Working directory for the child
    #[arg(short = 'C', long)]
    pub dir: Option<PathBuf>,

    /// How to print output chunks
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Wait for the command to finish, then print everything at once
    #[arg(long)]
    pub collect: bool,

    /// Forward this process's stdin to the child
    #[arg(long, conflicts_with = "collect")]
    pub stdin: bool,

    /// Log level: error, warn, info, debug or trace (overrides TERMRUN_LOG)
    #[arg(long)]
    pub log_level: Option<tracing::Level>,

    /// Command to run: a path, or a bare name looked up on PATH
    pub command: String,

    /// Arguments passed to the command unchanged
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Output rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Raw bytes to the matching stdout/stderr
    Text,
    /// One JSON object per chunk, then a final status line
    Json,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
