#![allow(dead_code)]

use futures_util::future::BoxFuture;
use rosetta_imap::error::SessionError;
use rosetta_imap::imap::hooks::{self, HookCall, HookContext, HookHandler, HookRegistry, Outcome};
use rosetta_imap::imap::{run_connection, BoxedStream, SessionSettings, TransportUpgrade};
use rosetta_imap::plugins::accounts::{hash_password, AccountInfo, AccountsConfig};
use rosetta_imap::plugins::{Mailboxes, PlainAuthenticator};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const HOSTNAME: &str = "imap.test";
pub const USER: &str = "fred@example.com";
pub const PASSWORD: &str = "secret";

/// Long enough for the idle watchdog to win under paused time
const READ_TIMEOUT: Duration = Duration::from_secs(120);

pub fn settings() -> SessionSettings {
    SessionSettings {
        hostname: HOSTNAME.to_string(),
        ..SessionSettings::default()
    }
}

/// Client end of an in-memory session
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    pub server: JoinHandle<Result<(), SessionError>>,
}

impl TestClient {
    pub fn start(registry: HookRegistry) -> Self {
        Self::start_with(registry, settings())
    }

    pub fn start_with(registry: HookRegistry, settings: SessionSettings) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(run_connection(
            Box::new(server),
            "198.51.100.4:50143".parse().unwrap(),
            false,
            Arc::new(settings),
            Arc::new(registry),
        ));
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
            server,
        }
    }

    /// Start and consume the greeting
    pub async fn connect(registry: HookRegistry) -> Self {
        let mut client = Self::start(registry);
        client.expect(&format!("* OK {} IMAP4rev1 Service Ready", HOSTNAME)).await;
        client
    }

    pub async fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line without CRLF; `None` on EOF
    pub async fn try_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the server")
            .unwrap();
        if n == 0 {
            return None;
        }
        assert!(line.ends_with("\r\n"), "line not CRLF terminated: {:?}", line);
        line.truncate(line.len() - 2);
        Some(line)
    }

    pub async fn line(&mut self) -> String {
        self.try_line().await.expect("connection closed")
    }

    pub async fn expect(&mut self, expected: &str) {
        assert_eq!(self.line().await, expected);
    }

    /// Nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_millis(100), self.reader.read_line(&mut line)).await;
        assert!(read.is_err(), "unexpected output: {:?}", line);
    }

    pub async fn expect_closed(&mut self) {
        assert_eq!(self.try_line().await, None);
    }
}

/// Handler answering with a fixed outcome
pub struct Fixed(pub Outcome);

impl HookHandler for Fixed {
    fn name(&self) -> &str {
        "fixed"
    }

    fn handle<'a>(&'a self, _ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move { self.0.clone() })
    }
}

/// Handler that waits for a signal before answering
pub struct Gated {
    pub gate: Arc<Notify>,
    pub outcome: Outcome,
    pub calls: Arc<AtomicUsize>,
}

impl Gated {
    pub fn new(outcome: Outcome) -> (Self, Arc<Notify>, Arc<AtomicUsize>) {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Self {
            gate: gate.clone(),
            outcome,
            calls: calls.clone(),
        };
        (handler, gate, calls)
    }
}

impl HookHandler for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn handle<'a>(&'a self, _ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome.clone()
        })
    }
}

pub struct Panicking;

impl HookHandler for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn handle<'a>(&'a self, _ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move { explode() })
    }
}

fn explode() -> Outcome {
    panic!("handler blew up")
}

/// Prompts for one continuation line and echoes it back as the OK text
pub struct Echo;

impl HookHandler for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match ctx.continuation("Say something").await {
                Ok(answer) => Outcome::ok_with(format!("heard {}", answer)),
                Err(e) => Outcome::error(e),
            }
        })
    }
}

/// STARTTLS stand-in that swaps in the same stream
pub struct FakeTls {
    pub upgrades: Arc<AtomicUsize>,
}

struct PassThrough {
    upgrades: Arc<AtomicUsize>,
}

impl TransportUpgrade for PassThrough {
    fn upgrade(self: Box<Self>, stream: BoxedStream) -> BoxFuture<'static, std::io::Result<BoxedStream>> {
        Box::pin(async move {
            self.upgrades.fetch_add(1, Ordering::SeqCst);
            Ok(stream)
        })
    }
}

impl HookHandler for FakeTls {
    fn name(&self) -> &str {
        "fake-tls"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let upgrade = PassThrough {
                upgrades: self.upgrades.clone(),
            };
            match ctx.upgrade_transport(Box::new(upgrade)) {
                Ok(()) => Outcome::ok(),
                Err(e) => Outcome::error(e),
            }
        })
    }
}

pub fn accounts() -> AccountsConfig {
    let mut users = HashMap::new();
    users.insert(
        USER.to_string(),
        AccountInfo {
            password_hash: hash_password(PASSWORD).unwrap(),
        },
    );
    AccountsConfig { users }
}

/// Registry with real accounts and mailboxes
pub fn mail_registry() -> HookRegistry {
    let mut registry = HookRegistry::new();
    registry.register(hooks::auth_hook("PLAIN"), Arc::new(PlainAuthenticator::new(accounts())));
    let mailboxes = Arc::new(Mailboxes::new(vec![
        "INBOX".to_string(),
        "Sent".to_string(),
        "Trash".to_string(),
    ]));
    registry.register(hooks::LIST, mailboxes.clone());
    registry.register(hooks::SELECT, mailboxes);
    registry
}
