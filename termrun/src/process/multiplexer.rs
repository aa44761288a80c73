//! Concurrent draining of a child's stdout and stderr.
//!
//! Each source gets its own reader task that keeps reading until
//! end-of-stream, turning every non-empty read into one [`Message`]. Both
//! readers post into a single channel, and one delivery task hands the
//! messages to the observer in the order they arrived. Neither stream can
//! starve the other: a slow or silent stderr never holds up stdout.
//!
//! The multiplexer counts as drained once both readers have hit
//! end-of-stream and the delivery task has handed over the last message.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::message::{Channel, Message};

/// Receives every chunk a process produces, one call per chunk.
///
/// Runs on a runtime worker, so it should return quickly.
pub type Observer = Box<dyn FnMut(Message) + Send + 'static>;

/// Read buffer per stream; a chunk is never larger than this.
const READ_CHUNK_SIZE: usize = 8 * 1024;

pub struct StreamMultiplexer {
    delivery: JoinHandle<()>,
}

impl StreamMultiplexer {
    /// Start draining the given sources.
    ///
    /// Must be called within a Tokio runtime. Missing sources count as
    /// already drained.
    pub fn start<O, E>(stdout: Option<O>, stderr: Option<E>, observer: Option<Observer>) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();

        if let Some(stdout) = stdout {
            tokio::spawn(pump(stdout, Channel::Stdout, tx.clone()));
        }

        if let Some(stderr) = stderr {
            tokio::spawn(pump(stderr, Channel::Stderr, tx.clone()));
        }

        // The channel closes once both readers drop their senders.
        drop(tx);

        Self {
            delivery: tokio::spawn(deliver(rx, observer)),
        }
    }

    /// Wait until both sources are exhausted and every chunk was delivered.
    pub async fn drained(self) {
        if let Err(e) = self.delivery.await {
            warn!(error = %e, "output delivery task ended abnormally");
        }
    }
}

/// Read one source to end-of-stream.
///
/// Keeps reading even if the delivery side is gone, so the child never
/// blocks on a full pipe.
async fn pump<R>(mut source: R, channel: Channel, tx: mpsc::UnboundedSender<Message>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0usize;

    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                let _ = tx.send(channel.message(buf[..n].to_vec()));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(stream = %channel, error = %e, "read failed; detaching stream");
                break;
            }
        }
    }

    debug!(stream = %channel, bytes = total, "stream reached end of input");
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Message>, mut observer: Option<Observer>) {
    let mut chunks = 0usize;

    while let Some(message) = rx.recv().await {
        chunks += 1;
        trace!(stream = %message.channel(), bytes = message.len(), "delivering chunk");
        if let Some(observer) = observer.as_mut() {
            observer(message);
        }
    }

    debug!(chunks, "multiplexer drained");
}
