/// IMAP4rev1 session engine
///
/// Framing, continuation prompts, the session state machine and the plugin
/// hook pipeline. Mailbox semantics live in plugins; this module only
/// implements:
/// - CAPABILITY, NOOP, LOGOUT in any state
/// - STARTTLS, AUTHENTICATE, LOGIN before authentication
/// - LIST, SELECT once authenticated
/// - synchronizing and non-synchronizing literals

pub mod command;
pub mod connection;
pub mod continuation;
pub mod framer;
pub mod hooks;
pub mod response;
pub mod session;
pub mod transport;
pub mod watchdog;

pub use command::ImapCommand;
pub use connection::run_connection;
pub use hooks::{HookCall, HookContext, HookHandler, HookMode, HookRegistry, Outcome, Verdict};
pub use session::{ImapSession, ImapState, SessionSettings};
pub use transport::{BoxedStream, TransportUpgrade};
