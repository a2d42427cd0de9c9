/// IMAP response formatting and the per-session response writer

use std::collections::VecDeque;
use std::fmt;

/// Status word of a response line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    /// Server-initiated farewell, always untagged
    Bye,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Ok => "OK",
            Status::No => "NO",
            Status::Bad => "BAD",
            Status::Bye => "BYE",
        })
    }
}

/// Format a status response; `None` produces an untagged `*` line
pub fn status(tag: Option<&str>, status: Status, text: &str) -> String {
    format!("{} {} {}\r\n", tag.unwrap_or("*"), status, text)
}

/// Format an untagged data response
pub fn untagged(response: &str) -> String {
    format!("* {}\r\n", response)
}

/// Format a continuation request
pub fn continuation(text: &str) -> String {
    format!("+ {}\r\n", text)
}

/// Queue of outgoing frames, one frame per logical response
///
/// Frames leave in the order they were queued. Once closed, further
/// writes are dropped instead of failing.
#[derive(Debug)]
pub struct ResponseWriter {
    peer: String,
    outbox: VecDeque<Vec<u8>>,
    closed: bool,
}

impl ResponseWriter {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            outbox: VecDeque::new(),
            closed: false,
        }
    }

    /// Tagged or untagged status response
    pub fn respond(&mut self, tag: Option<&str>, status: Status, text: &str) {
        self.push(self::status(tag, status, text));
    }

    pub fn untagged(&mut self, data: &str) {
        self.push(untagged(data));
    }

    pub fn continuation(&mut self, text: &str) {
        self.push(continuation(text));
    }

    fn push(&mut self, frame: String) {
        if self.closed {
            tracing::debug!("[{}] dropping write after close: {}", self.peer, frame.trim_end());
            return;
        }
        tracing::debug!("[{}] <<< {}", self.peer, frame.trim_end());
        self.outbox.push_back(frame.into_bytes());
    }

    /// Next frame to put on the wire
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    /// Refuse further writes; frames already queued still go out
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
