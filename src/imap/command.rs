/// IMAP command parsing

use base64::Engine;
use thiserror::Error;

/// Announced literal at the end of a command line: `{N}` or `{N+}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Literal {
    pub size: usize,
    /// `{N}` waits for a continuation prompt; `{N+}` (LITERAL+) does not
    pub synchronizing: bool,
}

/// Parsed IMAP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapCommand {
    pub tag: String,
    pub name: String,
    pub args: Vec<String>,
    /// Set while the command still waits for literal bytes
    pub literal: Option<Literal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty command line")]
    Empty,

    #[error("Missing command name")]
    MissingCommand { tag: String },
}

impl ImapCommand {
    /// Parse an IMAP command line (without CRLF)
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let (mut parts, literal) = tokenize(line);
        if parts.is_empty() {
            return Err(ParseError::Empty);
        }

        let tag = parts.remove(0);
        if parts.is_empty() {
            return Err(ParseError::MissingCommand { tag });
        }
        let name = parts.remove(0).to_uppercase();

        Ok(ImapCommand {
            tag,
            name,
            args: parts,
            literal,
        })
    }

    pub fn needs_literal(&self) -> bool {
        self.literal.is_some()
    }

    /// Store the bytes of the pending literal as the next argument
    pub fn push_literal(&mut self, data: &[u8]) {
        self.args.push(String::from_utf8_lossy(data).into_owned());
        self.literal = None;
    }

    /// Continue the command with the line that followed a literal
    pub fn extend(&mut self, line: &str) {
        let (parts, literal) = tokenize(line);
        self.args.extend(parts);
        self.literal = literal;
    }

    /// Rewrite `LOGIN user pass` into `AUTHENTICATE PLAIN <initial-response>`
    pub fn login_to_authenticate(&self) -> ImapCommand {
        let user = self.args.first().map(String::as_str).unwrap_or_default();
        let pass = self.args.get(1).map(String::as_str).unwrap_or_default();
        let credentials = format!("\0{}\0{}", user, pass);
        let initial = base64::engine::general_purpose::STANDARD.encode(credentials);

        ImapCommand {
            tag: self.tag.clone(),
            name: "AUTHENTICATE".to_string(),
            args: vec!["PLAIN".to_string(), initial],
            literal: None,
        }
    }
}

/// Split a line into atoms and quoted strings; strips a trailing literal marker
fn tokenize(line: &str) -> (Vec<String>, Option<Literal>) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            ' ' if !in_quotes => {
                if !current.is_empty() || quoted {
                    parts.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() || quoted {
        parts.push(current);
        if !quoted {
            if let Some(literal) = parts.last().and_then(|last| parse_literal(last)) {
                parts.pop();
                return (parts, Some(literal));
            }
        }
    }

    (parts, None)
}

fn parse_literal(token: &str) -> Option<Literal> {
    let inner = token.strip_prefix('{')?.strip_suffix('}')?;
    let (digits, synchronizing) = match inner.strip_suffix('+') {
        Some(digits) => (digits, false),
        None => (inner, true),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(Literal {
        size: digits.parse().ok()?,
        synchronizing,
    })
}
