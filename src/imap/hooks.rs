/// Plugin hook pipeline
///
/// Plugins register handlers under hook names (`connection`, `starttls`,
/// `auth_<mechanism>`, `list`, `select`, `unknown_command`). Invoking a
/// hook runs its handlers in registration order on a separate task and
/// reduces them to a single `Outcome`:
/// - `HookMode::First` stops at the first handler that answers OK/NO/BAD
///   or fails
/// - `HookMode::All` runs every handler; results are not merged, only the
///   first failure is kept for logging
///
/// Handler panics are caught here and turned into failed outcomes.

use super::command::ImapCommand;
use super::continuation::ContinuationAnswer;
use super::session::ImapState;
use super::transport::TransportUpgrade;
use crate::error::HookError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::{JoinError, JoinHandle};

pub const CONNECTION: &str = "connection";
pub const STARTTLS: &str = "starttls";
pub const LIST: &str = "list";
pub const SELECT: &str = "select";
pub const UNKNOWN_COMMAND: &str = "unknown_command";
const AUTH_PREFIX: &str = "auth_";

/// Hook name for an authentication mechanism, e.g. `auth_plain`
pub fn auth_hook(mechanism: &str) -> String {
    format!("{}{}", AUTH_PREFIX, mechanism.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookMode {
    All,
    First,
}

/// Definitive answer of a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    No,
    Bad,
}

/// Terminal result of a hook invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub error: Option<HookError>,
    pub result: Option<Verdict>,
    pub message: Option<String>,
}

impl Outcome {
    /// No opinion; lets the next handler try
    pub fn none() -> Self {
        Self::default()
    }

    pub fn ok() -> Self {
        Self::verdict(Verdict::Ok, None)
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self::verdict(Verdict::Ok, Some(message.into()))
    }

    pub fn no(message: impl Into<String>) -> Self {
        Self::verdict(Verdict::No, Some(message.into()))
    }

    pub fn bad(message: impl Into<String>) -> Self {
        Self::verdict(Verdict::Bad, Some(message.into()))
    }

    pub fn error(error: HookError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    fn verdict(result: Verdict, message: Option<String>) -> Self {
        Self {
            error: None,
            result: Some(result),
            message,
        }
    }

    pub fn is_definitive(&self) -> bool {
        self.error.is_some() || self.result.is_some()
    }
}

/// Arguments bound to one hook invocation
#[derive(Debug, Clone)]
pub struct HookCall {
    pub hook: String,
    pub args: Vec<String>,
    /// The command that triggered the hook, when there is one
    pub command: Option<ImapCommand>,
}

impl HookCall {
    pub fn new(hook: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            hook: hook.into(),
            args,
            command: None,
        }
    }

    pub fn for_command(hook: impl Into<String>, command: ImapCommand) -> Self {
        Self {
            hook: hook.into(),
            args: command.args.clone(),
            command: Some(command),
        }
    }
}

/// Requests a running handler makes of its session
pub enum SessionRequest {
    Continuation {
        prompt: String,
        on_answer: ContinuationAnswer,
    },
    Untagged(String),
    Upgrade(Box<dyn TransportUpgrade>),
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionRequest::Continuation { prompt, .. } => {
                f.debug_struct("Continuation").field("prompt", prompt).finish()
            }
            SessionRequest::Untagged(data) => f.debug_tuple("Untagged").field(data).finish(),
            SessionRequest::Upgrade(_) => f.write_str("Upgrade"),
        }
    }
}

/// Free-form per-session metadata shared with plugins
pub type Notes = Arc<RwLock<HashMap<String, String>>>;

/// What a handler sees of its session
#[derive(Debug, Clone)]
pub struct HookContext {
    peer: SocketAddr,
    state: ImapState,
    capabilities: Vec<String>,
    secure: bool,
    notes: Notes,
    requests: mpsc::UnboundedSender<SessionRequest>,
}

impl HookContext {
    pub fn new(
        peer: SocketAddr,
        state: ImapState,
        capabilities: Vec<String>,
        secure: bool,
        notes: Notes,
        requests: mpsc::UnboundedSender<SessionRequest>,
    ) -> Self {
        Self {
            peer,
            state,
            capabilities,
            secure,
            notes,
            requests,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Session state when the hook was invoked
    pub fn state(&self) -> ImapState {
        self.state
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub async fn note(&self, key: &str) -> Option<String> {
        self.notes.read().await.get(key).cloned()
    }

    pub async fn set_note(&self, key: impl Into<String>, value: impl Into<String>) {
        self.notes.write().await.insert(key.into(), value.into());
    }

    /// Prompt the client with `+ <prompt>` and wait for its answer line
    pub async fn continuation(&self, prompt: impl Into<String>) -> Result<String, HookError> {
        let (on_answer, answer) = oneshot::channel();
        self.send(SessionRequest::Continuation {
            prompt: prompt.into(),
            on_answer,
        })?;
        answer.await.map_err(|_| HookError::SessionClosed)?
    }

    /// Queue an untagged response ahead of the command's completion
    pub fn untagged(&self, data: impl Into<String>) -> Result<(), HookError> {
        self.send(SessionRequest::Untagged(data.into()))
    }

    /// Swap the transport once this hook has been answered with OK
    pub fn upgrade_transport(&self, upgrade: Box<dyn TransportUpgrade>) -> Result<(), HookError> {
        self.send(SessionRequest::Upgrade(upgrade))
    }

    fn send(&self, request: SessionRequest) -> Result<(), HookError> {
        self.requests.send(request).map_err(|_| HookError::SessionClosed)
    }
}

/// A plugin's handler for one or more hooks
pub trait HookHandler: Send + Sync {
    /// Plugin name, for logs
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, ctx: &'a HookContext, call: &'a HookCall) -> BoxFuture<'a, Outcome>;
}

/// Read-only mapping of hook name to handlers, built at startup
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Arc<dyn HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl Into<String>, handler: Arc<dyn HookHandler>) {
        self.hooks.entry(hook.into()).or_default().push(handler);
    }

    pub fn handlers(&self, hook: &str) -> Vec<Arc<dyn HookHandler>> {
        self.hooks.get(hook).cloned().unwrap_or_default()
    }

    pub fn has(&self, hook: &str) -> bool {
        self.hooks.get(hook).is_some_and(|handlers| !handlers.is_empty())
    }

    /// Mechanisms with a registered `auth_<mechanism>` hook, uppercased and sorted
    pub fn auth_mechanisms(&self) -> Vec<String> {
        let mut mechanisms: Vec<String> = self
            .hooks
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .filter_map(|(hook, _)| hook.strip_prefix(AUTH_PREFIX))
            .map(str::to_uppercase)
            .collect();
        mechanisms.sort();
        mechanisms
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (hook, handlers) in &self.hooks {
            let names: Vec<&str> = handlers.iter().map(|h| h.name()).collect();
            map.entry(hook, &names);
        }
        map.finish()
    }
}

/// A hook ready to run
#[derive(Debug)]
pub struct HookInvocation {
    pub call: HookCall,
    pub mode: HookMode,
    pub context: HookContext,
}

#[derive(Debug, Clone)]
pub struct HookPipeline {
    registry: Arc<HookRegistry>,
}

impl HookPipeline {
    pub fn new(registry: Arc<HookRegistry>) -> Self {
        Self { registry }
    }

    /// Run the invocation on its own task
    ///
    /// Dropping the handle does not cancel the handlers; they finish on
    /// their own and whatever they ask of a closed session is ignored.
    pub fn invoke(&self, invocation: HookInvocation) -> JoinHandle<Outcome> {
        let handlers = self.registry.handlers(&invocation.call.hook);
        tokio::spawn(run_handlers(
            handlers,
            invocation.call,
            invocation.mode,
            invocation.context,
        ))
    }
}

/// Turn a finished pipeline task into an outcome
pub fn joined(result: Result<Outcome, JoinError>) -> Outcome {
    match result {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Outcome::error(HookError::Panicked),
        Err(_) => Outcome::error(HookError::SessionClosed),
    }
}

pub async fn run_handlers(
    handlers: Vec<Arc<dyn HookHandler>>,
    call: HookCall,
    mode: HookMode,
    ctx: HookContext,
) -> Outcome {
    let mut first_error = None;

    for handler in handlers {
        let outcome = match AssertUnwindSafe(handler.handle(&ctx, &call)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!("[{}] plugin {} panicked in hook {}", ctx.peer, handler.name(), call.hook);
                Outcome::error(HookError::Panicked)
            }
        };

        match mode {
            HookMode::First if outcome.is_definitive() => return outcome,
            HookMode::First => {}
            HookMode::All => {
                if let Some(error) = outcome.error {
                    tracing::warn!("[{}] plugin {} failed in hook {}: {}", ctx.peer, handler.name(), call.hook, error);
                    first_error.get_or_insert(error);
                }
            }
        }
    }

    Outcome {
        error: first_error,
        ..Outcome::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        outcome: Outcome,
        calls: Arc<AtomicUsize>,
    }

    impl HookHandler for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn handle<'a>(&'a self, _ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.outcome.clone()
            })
        }
    }

    struct Panicking;

    impl HookHandler for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn handle<'a>(&'a self, _ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
            Box::pin(async move { explode() })
        }
    }

    fn explode() -> Outcome {
        panic!("boom")
    }

    fn fixed(outcome: Outcome, calls: &Arc<AtomicUsize>) -> Arc<dyn HookHandler> {
        Arc::new(Fixed {
            outcome,
            calls: calls.clone(),
        })
    }

    fn context() -> (HookContext, mpsc::UnboundedReceiver<SessionRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = HookContext::new(
            "127.0.0.1:4000".parse().unwrap(),
            ImapState::NotAuthenticated,
            vec!["IMAP4rev1".to_string()],
            false,
            Notes::default(),
            tx,
        );
        (ctx, rx)
    }

    async fn invoke(registry: HookRegistry, hook: &str, mode: HookMode) -> Outcome {
        let (context, _rx) = context();
        let pipeline = HookPipeline::new(Arc::new(registry));
        let handle = pipeline.invoke(HookInvocation {
            call: HookCall::new(hook, vec![]),
            mode,
            context,
        });
        joined(handle.await)
    }

    #[tokio::test]
    async fn test_first_stops_at_definitive_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(LIST, fixed(Outcome::none(), &calls));
        registry.register(LIST, fixed(Outcome::no("nope"), &calls));
        registry.register(LIST, fixed(Outcome::ok(), &calls));

        let outcome = invoke(registry, LIST, HookMode::First).await;
        assert_eq!(outcome, Outcome::no("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_runs_every_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(CONNECTION, fixed(Outcome::ok(), &calls));
        registry.register(CONNECTION, fixed(Outcome::error(HookError::handler("first")), &calls));
        registry.register(CONNECTION, fixed(Outcome::error(HookError::handler("second")), &calls));

        let outcome = invoke(registry, CONNECTION, HookMode::All).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.error, Some(HookError::handler("first")));
        assert_eq!(outcome.result, None);
    }

    #[tokio::test]
    async fn test_no_handlers_gives_no_result() {
        let outcome = invoke(HookRegistry::new(), UNKNOWN_COMMAND, HookMode::First).await;
        assert_eq!(outcome, Outcome::none());
    }

    #[tokio::test]
    async fn test_panic_becomes_error_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(SELECT, Arc::new(Panicking));
        registry.register(SELECT, fixed(Outcome::ok(), &calls));

        let outcome = invoke(registry, SELECT, HookMode::First).await;
        assert_eq!(outcome.error, Some(HookError::Panicked));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_requests_reach_session() {
        let (ctx, mut rx) = context();
        ctx.untagged("LIST () \"/\" INBOX").unwrap();
        assert!(matches!(rx.recv().await, Some(SessionRequest::Untagged(data)) if data == "LIST () \"/\" INBOX"));

        ctx.set_note("user", "fred").await;
        assert_eq!(ctx.note("user").await.as_deref(), Some("fred"));

        drop(rx);
        assert_eq!(ctx.untagged("late"), Err(HookError::SessionClosed));
        assert_eq!(ctx.continuation("more").await, Err(HookError::SessionClosed));
    }

    #[test]
    fn test_registry_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HookRegistry::new();
        registry.register(auth_hook("PLAIN"), fixed(Outcome::ok(), &calls));
        registry.register(auth_hook("xoauth2"), fixed(Outcome::ok(), &calls));

        assert!(registry.has("auth_plain"));
        assert!(!registry.has(STARTTLS));
        assert_eq!(registry.auth_mechanisms(), vec!["PLAIN", "XOAUTH2"]);
        assert_eq!(registry.handlers("auth_plain").len(), 1);
    }
}
