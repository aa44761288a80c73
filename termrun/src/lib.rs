//! termrun - run child processes and stream their output as it arrives.
//!
//! A [`Runner`] holds what to launch; each invocation yields a
//! [`ProcessHandle`] that streams stdout/stderr chunks to an observer,
//! accepts stdin writes, and reports its exit status exactly once to every
//! termination callback, blocking waiter, or async waiter.

pub mod error;
pub mod process;

pub use error::{Result, RunnerError};
pub use process::{
    Channel, ExecutableResolver, LaunchSpec, Message, MessageStream, MessageView, MessagesExt,
    Observer, ProcessHandle, Runner, Status, StreamMultiplexer,
};
