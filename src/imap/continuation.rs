/// Single-slot continuation channel
///
/// A hook can prompt the client with `+ <text>` and wait for the next line
/// that starts with `+`. Only one prompt may be outstanding per session.

use super::response::ResponseWriter;
use crate::error::HookError;
use tokio::sync::oneshot;

/// Marker that starts both the server prompt and the client answer
pub const MARKER: char = '+';

/// Receiver side of a continuation request
pub type ContinuationAnswer = oneshot::Sender<Result<String, HookError>>;

#[derive(Debug, Default)]
pub struct ContinuationSlot {
    pending: Option<ContinuationAnswer>,
}

/// A `+` line arrived but nobody asked for one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnexpectedAnswer;

impl ContinuationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the prompt and park `on_answer` until the client replies
    ///
    /// A second request while one is outstanding is refused and reported
    /// back through its own `on_answer`.
    pub fn request(&mut self, writer: &mut ResponseWriter, prompt: &str, on_answer: ContinuationAnswer) {
        if self.pending.is_some() {
            let _ = on_answer.send(Err(HookError::ContinuationPending));
            return;
        }
        writer.continuation(prompt);
        self.pending = Some(on_answer);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Route a `+` line to the waiting requester
    ///
    /// The slot is emptied before the answer is delivered, so the requester
    /// may immediately ask again.
    pub fn answer(&mut self, line: &str) -> Result<(), UnexpectedAnswer> {
        let on_answer = self.pending.take().ok_or(UnexpectedAnswer)?;
        if on_answer.send(Ok(strip_marker(line).to_string())).is_err() {
            tracing::debug!("continuation answer arrived after its requester went away");
        }
        Ok(())
    }

    /// Fail the outstanding request, if any
    pub fn cancel(&mut self) {
        if let Some(on_answer) = self.pending.take() {
            let _ = on_answer.send(Err(HookError::SessionClosed));
        }
    }
}

/// Whether a raw line answers a continuation prompt
pub fn is_answer(line: &str) -> bool {
    line.starts_with(MARKER)
}

/// Drop the leading `+ ` of an answer line
pub fn strip_marker(line: &str) -> &str {
    let rest = line.strip_prefix(MARKER).unwrap_or(line);
    rest.strip_prefix(' ').unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_writes_prompt_and_answer_is_routed() {
        let mut writer = ResponseWriter::new("peer");
        let mut slot = ContinuationSlot::new();
        let (tx, mut rx) = oneshot::channel();

        slot.request(&mut writer, "Send credentials", tx);
        assert!(slot.is_pending());
        assert_eq!(writer.pop().unwrap(), b"+ Send credentials\r\n".to_vec());

        slot.answer("+ AGZyZWQAc2VjcmV0").unwrap();
        assert!(!slot.is_pending());
        assert_eq!(rx.try_recv().unwrap(), Ok("AGZyZWQAc2VjcmV0".to_string()));
    }

    #[test]
    fn test_second_request_is_refused() {
        let mut writer = ResponseWriter::new("peer");
        let mut slot = ContinuationSlot::new();
        let (first, _first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();

        slot.request(&mut writer, "one", first);
        slot.request(&mut writer, "two", second);

        assert_eq!(second_rx.try_recv().unwrap(), Err(HookError::ContinuationPending));
        assert_eq!(writer.pop().unwrap(), b"+ one\r\n".to_vec());
        assert!(writer.pop().is_none());
    }

    #[test]
    fn test_unexpected_answer() {
        let mut slot = ContinuationSlot::new();
        assert_eq!(slot.answer("+ hello"), Err(UnexpectedAnswer));
    }

    #[test]
    fn test_cancel_reports_session_closed() {
        let mut writer = ResponseWriter::new("peer");
        let mut slot = ContinuationSlot::new();
        let (tx, mut rx) = oneshot::channel();
        slot.request(&mut writer, "", tx);
        slot.cancel();
        assert_eq!(rx.try_recv().unwrap(), Err(HookError::SessionClosed));
    }

    #[test]
    fn test_strip_marker() {
        assert_eq!(strip_marker("+ abc"), "abc");
        assert_eq!(strip_marker("+abc"), "abc");
        assert_eq!(strip_marker("+"), "");
        assert!(is_answer("+ x"));
        assert!(!is_answer("a1 NOOP"));
    }
}
