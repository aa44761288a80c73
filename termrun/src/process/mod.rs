//! Asynchronous process launching with streamed output.
//!
//! - [`launch`] holds the immutable [`LaunchSpec`].
//! - [`message`] defines the tagged output chunks and their concatenation.
//! - [`multiplexer`] drains stdout and stderr concurrently into one
//!   delivery point.
//! - [`status`] tracks the lifecycle and fires termination callbacks once.
//! - [`handle`] ties one OS process to all of the above.
//! - [`resolver`] maps bare command names to paths, with a shared cache.
//! - [`runner`] is the facade most callers start from.

pub mod handle;
pub mod launch;
pub mod message;
pub mod multiplexer;
pub mod resolver;
pub mod runner;
pub mod status;

pub use handle::ProcessHandle;
pub use launch::LaunchSpec;
pub use message::{Channel, Message, MessageView, MessagesExt};
pub use multiplexer::{Observer, StreamMultiplexer};
pub use resolver::ExecutableResolver;
pub use runner::{MessageStream, Runner};
pub use status::{Status, TerminationCallback};
