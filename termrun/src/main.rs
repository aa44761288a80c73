//! termrun - run a command and stream its stdout/stderr as it arrives.
//!
//! Thin demo front end over the `termrun` library:
//! - resolves bare command names through `which`
//! - echoes each output chunk (raw or as JSON lines)
//! - optionally forwards stdin to the child
//! - exits with the child's exit code

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level);

    let code = execute(cli).await?;
    std::process::exit(code);
}
