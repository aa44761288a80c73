//! Caller-facing entry point.
//!
//! A [`Runner`] pins down *what* to run (executable, environment, working
//! directory) once; each call then launches a fresh [`ProcessHandle`] with
//! its own arguments.

use std::ffi::OsStr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::Result;

use super::handle::ProcessHandle;
use super::launch::LaunchSpec;
use super::message::Message;
use super::multiplexer::Observer;
use super::resolver::ExecutableResolver;

/// Chunks of one invocation as a [`Stream`](tokio_stream::Stream).
///
/// Ends once both output streams have drained.
pub type MessageStream = UnboundedReceiverStream<Message>;

/// Launches processes from one fixed [`LaunchSpec`].
///
/// # Example
///
/// ```rust,no_run
/// use termrun::{ExecutableResolver, LaunchSpec, MessagesExt, Runner};
///
/// #[tokio::main]
/// async fn main() -> termrun::Result<()> {
///     let resolver = ExecutableResolver::new();
///     let runner = Runner::from_command(&resolver, LaunchSpec::new("ls").working_dir("/tmp")).await?;
///
///     let messages = runner.invoke_and_collect(["-la"]).await?;
///     println!("{}", messages.joined_text().unwrap_or_default());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Runner {
    spec: Arc<LaunchSpec>,
}

impl Runner {
    /// Runner for an already-resolved executable path.
    pub fn new(spec: LaunchSpec) -> Self {
        Self {
            spec: Arc::new(spec),
        }
    }

    /// Runner for a command that may be a bare name.
    ///
    /// Bare names (no path separator) are resolved through `resolver` using
    /// the spec's own environment and working directory. Anything that
    /// already looks like a path is used as-is.
    pub async fn from_command(resolver: &ExecutableResolver, spec: LaunchSpec) -> Result<Self> {
        if !spec.is_bare_name() {
            return Ok(Self::new(spec));
        }

        let name = spec.program();
        let path = resolver
            .resolve(&name, spec.env.as_ref(), spec.working_dir.as_deref())
            .await?;
        debug!(command = %name, path = %path.display(), "runner resolved command");
        Ok(Self::new(spec.with_executable(path)))
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Launch without observing output. Chunks are still drained.
    pub fn launch<I, S>(&self, args: I) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        ProcessHandle::new(Arc::clone(&self.spec), None).launch(args)
    }

    /// Launch and report every chunk to `on_message` as it arrives.
    ///
    /// Returns as soon as the process is running.
    pub fn launch_with_callback<I, S, F>(&self, args: I, on_message: F) -> Result<ProcessHandle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
        F: FnMut(Message) + Send + 'static,
    {
        let observer: Observer = Box::new(on_message);
        ProcessHandle::new(Arc::clone(&self.spec), Some(observer)).launch(args)
    }

    /// Launch and expose the chunks as a stream instead of a callback.
    pub fn launch_streaming<I, S>(&self, args: I) -> Result<(ProcessHandle, MessageStream)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.launch_with_callback(args, move |message| {
            let _ = tx.send(message);
        })?;
        Ok((handle, UnboundedReceiverStream::new(rx)))
    }

    /// Run to completion and return every chunk in delivery order.
    ///
    /// Fails with [`RunnerError::NonZeroExit`](crate::RunnerError::NonZeroExit)
    /// if the process exits non-zero.
    pub async fn invoke_and_collect<I, S>(&self, args: I) -> Result<Vec<Message>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        ProcessHandle::accumulating(Arc::clone(&self.spec))
            .launch(args)?
            .drain_all()
            .await
    }
}
