//! CLI command execution.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use termrun::{
    ExecutableResolver, LaunchSpec, Message, MessageView, ProcessHandle, Runner, RunnerError,
    Status,
};

use super::args::{Cli, OutputFormat};

/// Run the command described by `cli` and return the exit code to use.
pub async fn execute(cli: Cli) -> Result<i32> {
    let runner = build_runner(&cli).await?;

    if cli.collect {
        collect(&runner, &cli).await
    } else {
        stream(&runner, &cli).await
    }
}

async fn build_runner(cli: &Cli) -> Result<Runner> {
    let mut spec = LaunchSpec::new(&cli.command);
    if !cli.env.is_empty() {
        spec = spec.envs(cli.env.iter().cloned());
    }
    if let Some(ref dir) = cli.dir {
        spec = spec.working_dir(dir);
    }

    let resolver = ExecutableResolver::new();
    Runner::from_command(&resolver, spec)
        .await
        .with_context(|| format!("Failed to resolve command: {}", cli.command))
}

/// Print chunks as they arrive.
async fn stream(runner: &Runner, cli: &Cli) -> Result<i32> {
    let format = cli.format;
    let handle = runner
        .launch_with_callback(&cli.args, move |message| print_message(&message, format))
        .with_context(|| format!("Failed to launch: {}", cli.command))?;

    if cli.stdin {
        tokio::spawn(forward_stdin(handle.clone()));
    } else {
        handle.close_stdin().await;
    }

    finish(&handle, format).await
}

/// Wait for completion, then print every chunk in delivery order.
async fn collect(runner: &Runner, cli: &Cli) -> Result<i32> {
    let store = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    let handle = runner
        .launch_with_callback(&cli.args, move |message| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(message);
        })
        .with_context(|| format!("Failed to launch: {}", cli.command))?;
    handle.close_stdin().await;

    let outcome = handle.wait().await;
    let messages = std::mem::take(&mut *store.lock().unwrap_or_else(PoisonError::into_inner));
    for message in &messages {
        print_message(message, cli.format);
    }

    exit_code(outcome, handle.status(), cli.format)
}

async fn finish(handle: &ProcessHandle, format: OutputFormat) -> Result<i32> {
    let outcome = handle.wait().await;
    exit_code(outcome, handle.status(), format)
}

fn exit_code(outcome: termrun::Result<()>, status: Status, format: OutputFormat) -> Result<i32> {
    let code = match outcome {
        Ok(()) => 0,
        Err(RunnerError::NonZeroExit(code)) => code,
        Err(e) => return Err(e).context("Process did not report completion"),
    };

    if format == OutputFormat::Json {
        println!("{}", json!({ "status": status }));
    }
    debug!(%status, "command finished");
    Ok(code)
}

fn print_message(message: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            let result = match message {
                Message::Output(bytes) => write_flush(&mut std::io::stdout().lock(), bytes),
                Message::Error(bytes) => write_flush(&mut std::io::stderr().lock(), bytes),
            };
            if let Err(e) = result {
                debug!(error = %e, "failed to echo chunk");
            }
        }
        OutputFormat::Json => match serde_json::to_string(&MessageView::from(message)) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode chunk"),
        },
    }
}

fn write_flush(out: &mut impl Write, bytes: &[u8]) -> std::io::Result<()> {
    out.write_all(bytes)?;
    out.flush()
}

/// Copy our stdin into the child's until either side closes.
async fn forward_stdin(handle: ProcessHandle) {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 8 * 1024];

    loop {
        match stdin.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = handle.write(&buf[..n]).await {
                    debug!(error = %e, "child stopped accepting input");
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
        }
    }

    handle.close_stdin().await;
}
