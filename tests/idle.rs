mod common;

use common::{Gated, TestClient};
use rosetta_imap::imap::hooks::{self, HookRegistry, Outcome};
use rosetta_imap::imap::SessionSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn settings(idle: u64) -> SessionSettings {
    SessionSettings {
        idle_timeout: Duration::from_secs(idle),
        ..common::settings()
    }
}

#[tokio::test(start_paused = true)]
async fn silent_client_is_disconnected() {
    let start = Instant::now();
    let mut client = TestClient::start_with(HookRegistry::new(), settings(30));
    client.line().await;

    client.expect("* BYE Disconnected for inactivity.").await;
    client.expect_closed().await;
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn activity_pushes_the_deadline_out() {
    let start = Instant::now();
    let mut client = TestClient::start_with(HookRegistry::new(), settings(30));
    client.line().await;

    tokio::time::sleep(Duration::from_secs(20)).await;
    client.send("a1 NOOP\r\n").await;
    client.expect("a1 OK NOOP completed").await;

    client.expect("* BYE Disconnected for inactivity.").await;
    assert!(start.elapsed() >= Duration::from_secs(50));
}

#[tokio::test(start_paused = true)]
async fn timeout_while_hook_is_pending() {
    let (gated, gate, _calls) = Gated::new(Outcome::ok());
    let mut registry = HookRegistry::new();
    registry.register(hooks::UNKNOWN_COMMAND, Arc::new(gated));
    let mut client = TestClient::start_with(registry, settings(10));
    client.line().await;

    client.send("a1 FROB\r\n").await;
    client.expect("* BYE Disconnected for inactivity.").await;
    client.expect_closed().await;

    // The detached hook finishing late must not disturb anything
    gate.notify_one();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(client.server.await.unwrap().is_ok());
}
