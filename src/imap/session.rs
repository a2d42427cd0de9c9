/// IMAP session handler
///
/// Holds everything one connection knows about the protocol: state,
/// buffered input, the continuation slot and queued output. It performs
/// no I/O. The connection driver feeds it bytes, runs the hook
/// invocations it queues and writes out the frames it produces.
///
/// While a hook is outstanding the session is paused: buffered lines stay
/// in the framer until the hook's outcome has been answered. The only
/// exception is a `+` line answering a continuation the hook asked for.

use super::command::{ImapCommand, Literal, ParseError};
use super::continuation::{self, ContinuationSlot};
use super::framer::LineFramer;
use super::hooks::{
    self, HookCall, HookContext, HookInvocation, HookMode, HookRegistry, Notes, Outcome, SessionRequest, Verdict,
};
use super::response::{ResponseWriter, Status};
use super::transport::TransportUpgrade;
use crate::error::{HookError, SessionError};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// IMAP session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImapState {
    /// Not authenticated
    NotAuthenticated,
    /// Authenticated but no mailbox selected
    Authenticated,
    /// Mailbox selected
    Selected,
}

/// Identity and limits shared by every session of a server
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub hostname: String,
    /// Base capabilities, advertised in every state
    pub capabilities: Vec<String>,
    pub idle_timeout: Duration,
    pub max_line_length: usize,
    pub max_literal_size: usize,
    /// Input buffered while a hook is running
    pub max_pending_input: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            capabilities: vec!["IMAP4rev1".to_string()],
            idle_timeout: Duration::from_secs(30),
            max_line_length: 8192,
            max_literal_size: 1024 * 1024,
            max_pending_input: 2 * 1024 * 1024,
        }
    }
}

/// How the outcome of the hook in flight gets answered
#[derive(Debug, Clone, PartialEq, Eq)]
enum Completion {
    Command { tag: String },
    Authenticate { tag: String },
    Select { tag: String },
    StartTls { tag: String },
    /// Nobody answers; failures are only logged
    Detached { hook: String },
}

/// IMAP session for one client connection
pub struct ImapSession {
    state: ImapState,
    peer: SocketAddr,
    secure: bool,
    settings: Arc<SessionSettings>,
    registry: Arc<HookRegistry>,
    notes: Notes,
    framer: LineFramer,
    continuation: ContinuationSlot,
    writer: ResponseWriter,
    requests: mpsc::UnboundedSender<SessionRequest>,
    /// Command waiting for literal bytes or for the rest of its line
    assembling: Option<ImapCommand>,
    paused: bool,
    closing: bool,
    /// Invocation waiting to be started by the driver
    queued: Option<HookInvocation>,
    in_flight: Option<Completion>,
    upgrade: Option<Box<dyn TransportUpgrade>>,
    /// STARTTLS accepted; input stays paused until the stream is swapped
    upgrade_ready: bool,
}

impl ImapSession {
    pub fn new(
        settings: Arc<SessionSettings>,
        registry: Arc<HookRegistry>,
        peer: SocketAddr,
        secure: bool,
        requests: mpsc::UnboundedSender<SessionRequest>,
    ) -> Self {
        let notes = HashMap::from([
            ("remote_address".to_string(), peer.ip().to_string()),
            ("remote_port".to_string(), peer.port().to_string()),
        ]);

        Self {
            state: ImapState::NotAuthenticated,
            peer,
            secure,
            framer: LineFramer::new(settings.max_line_length),
            settings,
            registry,
            notes: Arc::new(RwLock::new(notes)),
            continuation: ContinuationSlot::new(),
            writer: ResponseWriter::new(peer.to_string()),
            requests,
            assembling: None,
            paused: false,
            closing: false,
            queued: None,
            in_flight: None,
            upgrade: None,
            upgrade_ready: false,
        }
    }

    pub fn state(&self) -> ImapState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn notes(&self) -> Notes {
        self.notes.clone()
    }

    /// Capabilities for the current state
    pub fn capabilities(&self) -> Vec<String> {
        let mut capabilities = self.settings.capabilities.clone();
        if self.state == ImapState::NotAuthenticated {
            if !self.secure && self.registry.has(hooks::STARTTLS) {
                capabilities.push("STARTTLS".to_string());
            }
            capabilities.extend(
                self.registry
                    .auth_mechanisms()
                    .into_iter()
                    .map(|mechanism| format!("AUTH={}", mechanism)),
            );
        }
        capabilities
    }

    /// Send the greeting and announce the connection to plugins
    pub fn start(&mut self) {
        let greeting = format!("{} IMAP4rev1 Service Ready", self.settings.hostname);
        self.writer.respond(None, Status::Ok, &greeting);
        self.invoke(
            HookCall::new(hooks::CONNECTION, vec![]),
            HookMode::All,
            Completion::Detached {
                hook: hooks::CONNECTION.to_string(),
            },
        );
    }

    /// Next frame to write to the transport
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.writer.pop()
    }

    /// Hook invocation the driver should start now
    pub fn take_invocation(&mut self) -> Option<HookInvocation> {
        self.queued.take()
    }

    /// Stream upgrade to perform once pending frames are flushed
    pub fn take_upgrade(&mut self) -> Option<Box<dyn TransportUpgrade>> {
        if self.upgrade_ready {
            self.upgrade.take()
        } else {
            None
        }
    }

    /// The stream has been swapped; resume on the new one
    pub fn finish_upgrade(&mut self) {
        self.upgrade_ready = false;
        self.secure = true;
        self.resume();
    }

    /// Bytes arrived from the client
    pub fn on_data(&mut self, data: &[u8]) {
        self.framer.append(data);
        self.process();
        if let Err(e) = self.framer.check_length() {
            tracing::warn!("[{}] {}", self.peer, e);
            self.writer.respond(None, Status::Bad, "Line too long");
        }
        if self.paused && !self.closing && self.framer.buffered() > self.settings.max_pending_input {
            let e = SessionError::InputOverflow {
                limit: self.settings.max_pending_input,
            };
            tracing::warn!("[{}] {}", self.peer, e);
            self.farewell("Too much input while a command is in progress");
        }
    }

    pub fn on_idle_timeout(&mut self) {
        tracing::info!("[{}] idle for {:?}, disconnecting", self.peer, self.settings.idle_timeout);
        self.farewell("Disconnected for inactivity.");
    }

    /// The client went away
    pub fn on_disconnect(&mut self) {
        tracing::info!("[{}] client disconnected", self.peer);
        self.close();
    }

    /// Handle a request made by the running hook
    pub fn handle_request(&mut self, request: SessionRequest) {
        match request {
            SessionRequest::Continuation { prompt, on_answer } => {
                if self.closing {
                    let _ = on_answer.send(Err(HookError::SessionClosed));
                    return;
                }
                self.continuation.request(&mut self.writer, &prompt, on_answer);
                // The answer may already be buffered
                self.process();
            }
            SessionRequest::Untagged(data) => self.writer.untagged(&data),
            SessionRequest::Upgrade(upgrade) => self.upgrade = Some(upgrade),
        }
    }

    /// The hook in flight finished; answer it and resume input
    pub fn complete(&mut self, outcome: Outcome) {
        let Some(completion) = self.in_flight.take() else {
            tracing::warn!("[{}] hook outcome with no hook in flight", self.peer);
            return;
        };

        let upgrade_accepted = match completion {
            Completion::Command { tag } => {
                self.after_command(&tag, outcome);
                false
            }
            Completion::Authenticate { tag } => {
                self.after_authenticate(&tag, outcome);
                false
            }
            Completion::Select { tag } => {
                self.after_select(&tag, outcome);
                false
            }
            Completion::StartTls { tag } => self.after_starttls(&tag, outcome),
            Completion::Detached { hook } => {
                if let Some(error) = outcome.error {
                    tracing::error!("[{}] uncaught plugin error in hook {}: {}", self.peer, hook, error);
                }
                false
            }
        };

        // Whatever the finished hook was still waiting for is stale now
        self.continuation.cancel();

        if upgrade_accepted && self.upgrade.is_some() {
            // Anything sent after STARTTLS but before the handshake is plaintext
            self.framer.clear();
            self.upgrade_ready = true;
            return;
        }
        self.upgrade = None;
        self.resume();
    }

    fn resume(&mut self) {
        self.paused = false;
        self.process();
    }

    /// Consume buffered input until it runs out or a hook takes over
    fn process(&mut self) {
        while !self.closing && self.queued.is_none() && !self.upgrade_ready {
            if !self.paused {
                if let Some(size) = self.pending_literal_size() {
                    match self.framer.take_literal(size) {
                        Some(data) => {
                            if let Some(command) = self.assembling.as_mut() {
                                command.push_literal(&data);
                            }
                            continue;
                        }
                        None => break,
                    }
                }
            } else if !self.continuation_answer_ready() {
                break;
            }

            let Some(line) = self.framer.next_line() else {
                break;
            };
            self.on_line(line);
        }
    }

    fn pending_literal_size(&self) -> Option<usize> {
        self.assembling.as_ref()?.literal.map(|literal| literal.size)
    }

    fn continuation_answer_ready(&self) -> bool {
        self.continuation.is_pending()
            && self
                .framer
                .peek_line()
                .is_some_and(|line| line.first() == Some(&(continuation::MARKER as u8)))
    }

    fn on_line(&mut self, line: String) {
        tracing::debug!("[{}] >>> {}", self.peer, line);

        if let Some(mut command) = self.assembling.take() {
            command.extend(&line);
            self.on_command(command);
            return;
        }

        if continuation::is_answer(&line) {
            if self.continuation.answer(&line).is_err() {
                tracing::warn!("[{}] continuation data without a pending request", self.peer);
                self.farewell("Not allowed to send continuation data now");
            }
            return;
        }

        match ImapCommand::parse(&line) {
            Ok(command) => self.on_command(command),
            Err(ParseError::Empty) => {}
            Err(ParseError::MissingCommand { tag }) => {
                self.writer.respond(Some(&tag), Status::Bad, "Missing command name");
            }
        }
    }

    fn on_command(&mut self, command: ImapCommand) {
        match command.literal {
            Some(literal) => self.begin_literal(command, literal),
            None => self.dispatch(command),
        }
    }

    fn begin_literal(&mut self, command: ImapCommand, literal: Literal) {
        if literal.size > self.settings.max_literal_size {
            let error = SessionError::LiteralTooLarge {
                size: literal.size,
                limit: self.settings.max_literal_size,
            };
            tracing::warn!("[{}] {}", self.peer, error);
            if literal.synchronizing {
                self.writer.respond(Some(&command.tag), Status::Bad, "Literal too large");
            } else {
                // The client is already sending it; no way to resync
                self.farewell("Literal too large");
            }
            return;
        }

        self.framer.expect_literal(literal.size);
        if literal.synchronizing {
            self.writer.continuation("Ready for literal data");
        }
        self.assembling = Some(command);
    }

    fn dispatch(&mut self, command: ImapCommand) {
        match command.name.as_str() {
            "CAPABILITY" => {
                let capabilities = self.capabilities().join(" ");
                self.writer.untagged(&format!("CAPABILITY {}", capabilities));
                self.writer.respond(Some(&command.tag), Status::Ok, "CAPABILITY completed");
                return;
            }
            "NOOP" => {
                self.writer.respond(Some(&command.tag), Status::Ok, "NOOP completed");
                return;
            }
            "LOGOUT" => {
                self.writer.respond(None, Status::Bye, "See you soon!");
                self.writer.respond(Some(&command.tag), Status::Ok, "LOGOUT completed");
                self.close();
                return;
            }
            _ => {}
        }

        match self.state {
            ImapState::NotAuthenticated => self.dispatch_not_authenticated(command),
            ImapState::Authenticated => self.dispatch_authenticated(command),
            ImapState::Selected => self.unknown_command(command),
        }
    }

    fn dispatch_not_authenticated(&mut self, command: ImapCommand) {
        match command.name.as_str() {
            "STARTTLS" => {
                if self.secure {
                    self.writer.respond(Some(&command.tag), Status::Bad, "TLS already active");
                    return;
                }
                let tag = command.tag.clone();
                self.invoke(
                    HookCall::for_command(hooks::STARTTLS, command),
                    HookMode::First,
                    Completion::StartTls { tag },
                );
            }
            "LOGIN" => {
                if command.args.len() < 2 {
                    self.writer
                        .respond(Some(&command.tag), Status::Bad, "Need a username and password to login");
                    return;
                }
                let authenticate = command.login_to_authenticate();
                self.authenticate(authenticate);
            }
            "AUTHENTICATE" => self.authenticate(command),
            _ => self.unknown_command(command),
        }
    }

    fn authenticate(&mut self, command: ImapCommand) {
        let mechanism = match command.args.first() {
            Some(mechanism) if !mechanism.is_empty() => hooks::auth_hook(mechanism),
            _ => {
                self.writer.respond(
                    Some(&command.tag),
                    Status::Bad,
                    "Need an authentication mechanism to proceed.",
                );
                return;
            }
        };
        let tag = command.tag.clone();
        self.invoke(
            HookCall::for_command(mechanism, command),
            HookMode::First,
            Completion::Authenticate { tag },
        );
    }

    fn dispatch_authenticated(&mut self, command: ImapCommand) {
        match command.name.as_str() {
            "LIST" => {
                if command.args.len() != 2 {
                    self.writer.respond(Some(&command.tag), Status::Bad, "LIST needs 2 arguments");
                    return;
                }
                let tag = command.tag.clone();
                self.invoke(
                    HookCall::for_command(hooks::LIST, command),
                    HookMode::First,
                    Completion::Command { tag },
                );
            }
            "SELECT" => {
                if command.args.len() != 1 {
                    self.writer.respond(Some(&command.tag), Status::Bad, "SELECT needs a mailbox name");
                    return;
                }
                let tag = command.tag.clone();
                self.invoke(
                    HookCall::for_command(hooks::SELECT, command),
                    HookMode::First,
                    Completion::Select { tag },
                );
            }
            _ => {
                tracing::debug!("[{}] unimplemented command {} {:?}", self.peer, command.name, command.args);
                self.writer.respond(Some(&command.tag), Status::Bad, "Command not implemented");
            }
        }
    }

    fn unknown_command(&mut self, command: ImapCommand) {
        let tag = command.tag.clone();
        self.invoke(
            HookCall::for_command(hooks::UNKNOWN_COMMAND, command),
            HookMode::First,
            Completion::Command { tag },
        );
    }

    fn invoke(&mut self, call: HookCall, mode: HookMode, completion: Completion) {
        tracing::debug!("[{}] invoking hook {}", self.peer, call.hook);
        let context = HookContext::new(
            self.peer,
            self.state,
            self.capabilities(),
            self.secure,
            self.notes.clone(),
            self.requests.clone(),
        );
        self.paused = true;
        self.queued = Some(HookInvocation { call, mode, context });
        self.in_flight = Some(completion);
    }

    fn after_command(&mut self, tag: &str, outcome: Outcome) {
        let message = outcome.message.as_deref();
        if let Some(error) = &outcome.error {
            tracing::error!("[{}] plugin error: {}", self.peer, error);
            self.writer
                .respond(Some(tag), Status::Bad, message.unwrap_or("Error processing your request."));
            return;
        }
        match outcome.result {
            Some(Verdict::Ok) => self.writer.respond(Some(tag), Status::Ok, message.unwrap_or("completed.")),
            Some(Verdict::No) => self.writer.respond(Some(tag), Status::No, message.unwrap_or("action refused.")),
            Some(Verdict::Bad) => self.writer.respond(Some(tag), Status::Bad, message.unwrap_or("Client error.")),
            None => {
                tracing::warn!("[{}] plugin sent no result (message: {:?})", self.peer, message);
                self.writer.respond(Some(tag), Status::Bad, "Something strange happened.");
            }
        }
    }

    fn after_authenticate(&mut self, tag: &str, outcome: Outcome) {
        if outcome.error.is_some() || self.state != ImapState::NotAuthenticated {
            return self.after_command(tag, outcome);
        }
        match outcome.result {
            Some(Verdict::Ok) => {
                self.state = ImapState::Authenticated;
                let message = outcome.message.unwrap_or_else(|| {
                    format!("[CAPABILITY {}] Logged in", self.capabilities().join(" "))
                });
                self.writer.respond(Some(tag), Status::Ok, &message);
            }
            Some(Verdict::No) => {
                let message = outcome.message.as_deref().unwrap_or("Bad username or password.");
                self.writer.respond(Some(tag), Status::No, message);
            }
            _ => self.after_command(tag, outcome),
        }
    }

    fn after_select(&mut self, tag: &str, outcome: Outcome) {
        if outcome.error.is_some() || self.state != ImapState::Authenticated {
            return self.after_command(tag, outcome);
        }
        match outcome.result {
            Some(Verdict::Ok) => {
                self.state = ImapState::Selected;
                let message = outcome.message.as_deref().unwrap_or("Select completed");
                self.writer.respond(Some(tag), Status::Ok, message);
            }
            Some(Verdict::No) => {
                let message = outcome.message.as_deref().unwrap_or("Select failed");
                self.writer.respond(Some(tag), Status::No, message);
            }
            _ => self.after_command(tag, outcome),
        }
    }

    /// Returns whether the upgrade may go ahead
    fn after_starttls(&mut self, tag: &str, outcome: Outcome) -> bool {
        if outcome.error.is_none() && outcome.result == Some(Verdict::Ok) {
            let message = outcome.message.as_deref().unwrap_or("Begin TLS negotiation now");
            self.writer.respond(Some(tag), Status::Ok, message);
            return true;
        }
        self.after_command(tag, outcome);
        false
    }

    /// Untagged BYE, then close
    fn farewell(&mut self, text: &str) {
        self.writer.respond(None, Status::Bye, text);
        self.close();
    }

    fn close(&mut self) {
        self.closing = true;
        self.continuation.cancel();
        self.writer.close();
    }
}
