//! Tagged output chunks delivered by a running process.
//!
//! Every read from a child's stdout or stderr becomes exactly one
//! [`Message`]. Chunk boundaries are whatever the OS handed back from the
//! read; nothing here re-frames them into lines.

use std::ops::{Add, AddAssign};

use serde::Serialize;

/// Which pipe a chunk was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The child's standard output.
    Stdout,
    /// The child's standard error.
    Stderr,
}

impl Channel {
    /// Wrap a chunk read from this channel.
    pub fn message(self, bytes: Vec<u8>) -> Message {
        match self {
            Self::Stdout => Message::Output(bytes),
            Self::Stderr => Message::Error(bytes),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One chunk of bytes read from a child process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Message {
    /// Bytes read from stdout.
    Output(Vec<u8>),
    /// Bytes read from stderr.
    Error(Vec<u8>),
}

impl Message {
    /// The channel this chunk came from.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Output(_) => Channel::Stdout,
            Self::Error(_) => Channel::Stderr,
        }
    }

    /// Raw payload, regardless of channel.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Output(bytes) | Self::Error(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Output(bytes) | Self::Error(bytes) => bytes,
        }
    }

    pub const fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Decode the payload as UTF-8.
    ///
    /// Returns `None` when the bytes are not valid UTF-8. A chunk may end in
    /// the middle of a multi-byte sequence, so callers that need text across
    /// chunk boundaries should accumulate first and decode once.
    pub fn to_text(&self) -> Option<String> {
        std::str::from_utf8(self.bytes()).ok().map(str::to_owned)
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }
}

/// Concatenation keeps the variant when both sides agree and collapses to
/// [`Message::Output`] when they differ.
impl Add for Message {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        let both_error = self.is_error() && rhs.is_error();
        let mut bytes = self.into_bytes();
        bytes.extend_from_slice(rhs.bytes());
        if both_error {
            Self::Error(bytes)
        } else {
            Self::Output(bytes)
        }
    }
}

impl AddAssign for Message {
    fn add_assign(&mut self, rhs: Self) {
        let lhs = std::mem::replace(self, Self::Output(Vec::new()));
        *self = lhs + rhs;
    }
}

/// Serializable view of a chunk, used for JSON-lines output.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub stream: Channel,
    pub text: Option<String>,
    pub bytes: usize,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            stream: message.channel(),
            text: message.to_text(),
            bytes: message.len(),
        }
    }
}

/// Helpers for callers that accumulate a whole run's worth of chunks.
pub trait MessagesExt {
    /// All chunks' bytes in delivery order, decoded as UTF-8.
    fn joined_text(&self) -> Option<String>;

    /// Fold the chunks with `+`. `None` for an empty sequence.
    fn concat(&self) -> Option<Message>;

    /// Only the stdout chunks, decoded as UTF-8.
    fn output_text(&self) -> Option<String>;

    /// Only the stderr chunks, decoded as UTF-8.
    fn error_text(&self) -> Option<String>;
}

impl MessagesExt for [Message] {
    fn joined_text(&self) -> Option<String> {
        decode(self.iter())
    }

    fn concat(&self) -> Option<Message> {
        self.iter().cloned().reduce(|acc, next| acc + next)
    }

    fn output_text(&self) -> Option<String> {
        decode(self.iter().filter(|m| m.is_output()))
    }

    fn error_text(&self) -> Option<String> {
        decode(self.iter().filter(|m| m.is_error()))
    }
}

fn decode<'a>(messages: impl Iterator<Item = &'a Message>) -> Option<String> {
    let bytes: Vec<u8> = messages.flat_map(|m| m.bytes().iter().copied()).collect();
    String::from_utf8(bytes).ok()
}
