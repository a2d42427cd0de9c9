/// Static folder list for LIST and SELECT

use crate::imap::hooks::{self, HookCall, HookContext, HookHandler, Outcome};
use futures_util::future::BoxFuture;

/// Hierarchy delimiter
pub const DELIMITER: char = '/';

#[derive(Debug, Clone)]
pub struct Mailboxes {
    names: Vec<String>,
}

impl Mailboxes {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Configured mailboxes matching `reference` + `pattern`
    pub fn matching(&self, reference: &str, pattern: &str) -> Vec<&str> {
        let full = format!("{}{}", reference, pattern);
        self.names
            .iter()
            .map(String::as_str)
            .filter(|name| {
                wildcard_match(full.as_bytes(), name.as_bytes())
                    || (name.eq_ignore_ascii_case("INBOX")
                        && wildcard_match(full.to_uppercase().as_bytes(), b"INBOX"))
            })
            .collect()
    }

    /// Canonical name of a mailbox; INBOX is case-insensitive
    pub fn find(&self, name: &str) -> Option<&str> {
        self.names
            .iter()
            .map(String::as_str)
            .find(|candidate| {
                *candidate == name
                    || (candidate.eq_ignore_ascii_case("INBOX") && name.eq_ignore_ascii_case("INBOX"))
            })
    }

    async fn list(&self, ctx: &HookContext, call: &HookCall) -> Outcome {
        let (reference, pattern) = match call.args.as_slice() {
            [reference, pattern] => (reference.as_str(), pattern.as_str()),
            _ => return Outcome::bad("LIST needs 2 arguments"),
        };

        // Empty pattern asks for the delimiter only
        if pattern.is_empty() {
            let line = format!(r#"LIST (\Noselect) "{}" """#, DELIMITER);
            if let Err(e) = ctx.untagged(line) {
                return Outcome::error(e);
            }
            return Outcome::ok_with("LIST completed");
        }

        for name in self.matching(reference, pattern) {
            let line = format!(r#"LIST ({}) "{}" "{}""#, attributes(name), DELIMITER, name);
            if let Err(e) = ctx.untagged(line) {
                return Outcome::error(e);
            }
        }
        Outcome::ok_with("LIST completed")
    }

    async fn select(&self, ctx: &HookContext, call: &HookCall) -> Outcome {
        let Some(name) = call.args.first().and_then(|name| self.find(name)) else {
            return Outcome::no("Mailbox does not exist");
        };

        let lines = [
            r"FLAGS (\Answered \Flagged \Deleted \Seen \Draft)".to_string(),
            "0 EXISTS".to_string(),
            "0 RECENT".to_string(),
            "OK [UIDVALIDITY 1] UIDs valid".to_string(),
            "OK [UIDNEXT 1] Predicted next UID".to_string(),
        ];
        for line in lines {
            if let Err(e) = ctx.untagged(line) {
                return Outcome::error(e);
            }
        }

        ctx.set_note("mailbox", name).await;
        Outcome::ok_with("[READ-WRITE] SELECT completed")
    }
}

impl HookHandler for Mailboxes {
    fn name(&self) -> &str {
        "mailboxes"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match call.hook.as_str() {
                hooks::LIST => self.list(ctx, call).await,
                hooks::SELECT => self.select(ctx, call).await,
                _ => Outcome::none(),
            }
        })
    }
}

/// LIST attributes, including special-use flags for well-known folders
fn attributes(name: &str) -> String {
    let special = match name.to_ascii_lowercase().as_str() {
        "sent" => Some(r"\Sent"),
        "drafts" => Some(r"\Drafts"),
        "trash" => Some(r"\Trash"),
        "junk" => Some(r"\Junk"),
        _ => None,
    };
    match special {
        Some(flag) => format!(r"\HasNoChildren {}", flag),
        None => r"\HasNoChildren".to_string(),
    }
}

/// IMAP LIST matching: `*` matches anything, `%` anything but the delimiter
fn wildcard_match(pattern: &[u8], name: &[u8]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some((b'*', rest)) => (0..=name.len()).any(|i| wildcard_match(rest, &name[i..])),
        Some((b'%', rest)) => {
            let limit = name
                .iter()
                .position(|&b| b == DELIMITER as u8)
                .unwrap_or(name.len());
            (0..=limit).any(|i| wildcard_match(rest, &name[i..]))
        }
        Some((&c, rest)) => name.first() == Some(&c) && wildcard_match(rest, &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::hooks::{Notes, SessionRequest};
    use crate::imap::ImapState;
    use tokio::sync::mpsc;

    fn mailboxes() -> Mailboxes {
        Mailboxes::new(
            ["INBOX", "Sent", "Drafts", "Archive/2024", "Archive/2025"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        )
    }

    fn context() -> (HookContext, mpsc::UnboundedReceiver<SessionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = HookContext::new(
            "127.0.0.1:4000".parse().unwrap(),
            ImapState::Authenticated,
            vec![],
            false,
            Notes::default(),
            tx,
        );
        (ctx, rx)
    }

    fn untagged(rx: &mut mpsc::UnboundedReceiver<SessionRequest>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(request) = rx.try_recv() {
            if let SessionRequest::Untagged(line) = request {
                lines.push(line);
            }
        }
        lines
    }

    #[test]
    fn test_wildcards() {
        let mailboxes = mailboxes();
        assert_eq!(mailboxes.matching("", "*").len(), 5);
        assert_eq!(mailboxes.matching("", "%"), vec!["INBOX", "Sent", "Drafts"]);
        assert_eq!(mailboxes.matching("Archive/", "%"), vec!["Archive/2024", "Archive/2025"]);
        assert_eq!(mailboxes.matching("", "inbox"), vec!["INBOX"]);
        assert_eq!(mailboxes.matching("", "D*"), vec!["Drafts"]);
        assert!(mailboxes.matching("", "Nope").is_empty());
    }

    #[test]
    fn test_find() {
        let mailboxes = mailboxes();
        assert_eq!(mailboxes.find("inbox"), Some("INBOX"));
        assert_eq!(mailboxes.find("Sent"), Some("Sent"));
        assert_eq!(mailboxes.find("sent"), None);
    }

    #[tokio::test]
    async fn test_list_writes_untagged_lines() {
        let (ctx, mut rx) = context();
        let call = HookCall::new(hooks::LIST, vec!["".to_string(), "%".to_string()]);

        let outcome = mailboxes().handle(&ctx, &call).await;
        assert_eq!(outcome, Outcome::ok_with("LIST completed"));
        assert_eq!(
            untagged(&mut rx),
            vec![
                r#"LIST (\HasNoChildren) "/" "INBOX""#,
                r#"LIST (\HasNoChildren \Sent) "/" "Sent""#,
                r#"LIST (\HasNoChildren \Drafts) "/" "Drafts""#,
            ]
        );
    }

    #[tokio::test]
    async fn test_list_empty_pattern_returns_delimiter() {
        let (ctx, mut rx) = context();
        let call = HookCall::new(hooks::LIST, vec!["".to_string(), "".to_string()]);

        mailboxes().handle(&ctx, &call).await;
        assert_eq!(untagged(&mut rx), vec![r#"LIST (\Noselect) "/" """#]);
    }

    #[tokio::test]
    async fn test_select() {
        let (ctx, mut rx) = context();
        let call = HookCall::new(hooks::SELECT, vec!["inbox".to_string()]);

        let outcome = mailboxes().handle(&ctx, &call).await;
        assert_eq!(outcome, Outcome::ok_with("[READ-WRITE] SELECT completed"));
        let lines = untagged(&mut rx);
        assert_eq!(lines[1], "0 EXISTS");
        assert!(lines[0].starts_with("FLAGS ("));
        assert_eq!(ctx.note("mailbox").await.as_deref(), Some("INBOX"));

        let missing = HookCall::new(hooks::SELECT, vec!["Nope".to_string()]);
        assert_eq!(mailboxes().handle(&ctx, &missing).await, Outcome::no("Mailbox does not exist"));
    }
}
