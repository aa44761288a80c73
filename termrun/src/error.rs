//! Error type shared by every engine operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The lookup program could not map a bare command name to a path.
    #[error("command not found: {0}")]
    NotFound(String),

    /// The OS refused to start the process.
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process handle was already launched")]
    AlreadyLaunched,

    /// The process ran to completion but exited non-zero.
    #[error("process exited with code {0}")]
    NonZeroExit(i32),

    #[error("failed to write to stdin: {0}")]
    Write(#[source] std::io::Error),

    /// The termination watcher was dropped (usually a runtime shutdown)
    /// before it could publish a final status.
    #[error("process watcher stopped before reporting completion")]
    WatcherLost,
}

impl RunnerError {
    /// Exit code carried by [`RunnerError::NonZeroExit`].
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit(code) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
