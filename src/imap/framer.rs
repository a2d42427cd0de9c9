/// Line framing for the IMAP byte stream
///
/// Bytes are appended as they arrive; complete CRLF-terminated lines are
/// handed out in arrival order and the trailing fragment stays buffered
/// until the rest of it shows up. Literal payloads are taken out verbatim
/// by byte count, delimiters included.

use crate::error::SessionError;
use bytes::BytesMut;

/// Line delimiter on the wire
pub const CRLF: &[u8] = b"\r\n";

#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    max_line_length: usize,
    /// Bytes reserved for an announced literal, exempt from the line limit
    literal_reserved: usize,
    /// Skipping the rest of an overlong line
    discarding: bool,
    /// Last skipped byte was CR (delimiter may straddle two chunks)
    discard_saw_cr: bool,
}

impl LineFramer {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_line_length,
            literal_reserved: 0,
            discarding: false,
            discard_saw_cr: false,
        }
    }

    /// Append a chunk and enforce the line limit
    #[cfg(test)]
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<(), SessionError> {
        self.append(chunk);
        self.check_length()
    }

    /// Append a chunk without checking the limit
    ///
    /// Lets the caller consume lines and announce literals first, so literal
    /// bytes that arrived in the same chunk are not mistaken for a long line.
    pub fn append(&mut self, chunk: &[u8]) {
        let chunk = if self.discarding {
            match self.skip_discarded(chunk) {
                Some(rest) => rest,
                None => return,
            }
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);
    }

    /// Drop the unterminated tail if it exceeds the limit
    ///
    /// Fails with `LineTooLong` once the tail grows past the limit. The
    /// offending line is dropped up to its delimiter; lines that were
    /// already complete stay available. A trailing CR may be the first half
    /// of the delimiter and does not count towards the limit.
    pub fn check_length(&mut self) -> Result<(), SessionError> {
        let scan_from = self.literal_reserved.min(self.buffer.len());
        let tail_start = rfind_crlf(&self.buffer[scan_from..]).map_or(scan_from, |pos| scan_from + pos + 2);
        let ends_with_cr = self.buffer.len() > tail_start && self.buffer.last() == Some(&b'\r');
        let tail_len = self.buffer.len() - tail_start - usize::from(ends_with_cr);
        if tail_len > self.max_line_length {
            self.buffer.truncate(tail_start);
            self.discarding = true;
            self.discard_saw_cr = ends_with_cr;
            return Err(SessionError::LineTooLong {
                limit: self.max_line_length,
            });
        }
        Ok(())
    }

    /// Consume bytes of an overlong line; returns what follows its delimiter
    fn skip_discarded<'a>(&mut self, chunk: &'a [u8]) -> Option<&'a [u8]> {
        if self.discard_saw_cr && chunk.first() == Some(&b'\n') {
            self.discarding = false;
            return Some(&chunk[1..]);
        }
        match find_crlf(chunk) {
            Some(pos) => {
                self.discarding = false;
                Some(&chunk[pos + 2..])
            }
            None => {
                self.discard_saw_cr = chunk.last() == Some(&b'\r');
                None
            }
        }
    }

    /// Pop the next complete line, without its delimiter
    pub fn next_line(&mut self) -> Option<String> {
        let pos = find_crlf(&self.buffer)?;
        let line = self.buffer.split_to(pos + 2);
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Look at the next complete line without consuming it
    pub fn peek_line(&self) -> Option<&[u8]> {
        find_crlf(&self.buffer).map(|pos| &self.buffer[..pos])
    }

    /// Iterate over the complete lines buffered right now
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { framer: self }
    }

    /// Announce that the next `size` bytes belong to a literal
    pub fn expect_literal(&mut self, size: usize) {
        self.literal_reserved = size;
    }

    /// Take exactly `size` bytes once they have all arrived
    pub fn take_literal(&mut self, size: usize) -> Option<Vec<u8>> {
        if self.buffer.len() < size {
            return None;
        }
        self.literal_reserved = 0;
        let literal = self.buffer.split_to(size).to_vec();
        Some(literal)
    }

    /// Number of bytes waiting to be consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.literal_reserved = 0;
        self.discarding = false;
        self.discard_saw_cr = false;
    }
}

/// Lines available at the time `drain` was called; restartable after the next feed
pub struct Drain<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Drain<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_line()
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}

fn rfind_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).rposition(|w| w == CRLF)
}
