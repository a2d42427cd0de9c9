/// Per-connection driver
///
/// Runs one session over one byte stream: reads client bytes, starts the
/// hook invocations the session queues, relays handler requests, watches
/// for idleness and swaps the stream on STARTTLS.

use super::hooks::{joined, HookPipeline, HookRegistry, Outcome};
use super::session::{ImapSession, SessionSettings};
use super::transport::BoxedStream;
use super::watchdog::IdleWatchdog;
use crate::error::SessionError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 8192;

/// Serve a session until the client leaves or the session closes itself
pub async fn run_connection(
    mut stream: BoxedStream,
    peer: SocketAddr,
    secure: bool,
    settings: Arc<SessionSettings>,
    registry: Arc<HookRegistry>,
) -> Result<(), SessionError> {
    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let pipeline = HookPipeline::new(registry.clone());
    let mut session = ImapSession::new(settings.clone(), registry, peer, secure, requests_tx);
    let mut watchdog = IdleWatchdog::new(settings.idle_timeout);
    let mut in_flight: Option<JoinHandle<Outcome>> = None;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    tracing::info!("[{}] session started (secure: {})", peer, secure);
    session.start();

    loop {
        if in_flight.is_none() {
            if let Some(invocation) = session.take_invocation() {
                in_flight = Some(pipeline.invoke(invocation));
            }
        }

        flush(&mut stream, &mut session).await?;

        if let Some(upgrade) = session.take_upgrade() {
            tracing::debug!("[{}] upgrading transport", peer);
            stream = upgrade
                .upgrade(stream)
                .await
                .map_err(|e| SessionError::Upgrade(e.to_string()))?;
            session.finish_upgrade();
            watchdog.reset();
            continue;
        }

        if session.is_closing() {
            break;
        }

        tokio::select! {
            read = stream.read(&mut buf) => {
                match read? {
                    0 => {
                        session.on_disconnect();
                        break;
                    }
                    n => {
                        watchdog.reset();
                        session.on_data(&buf[..n]);
                    }
                }
            }
            outcome = finished(&mut in_flight) => {
                in_flight = None;
                // Untagged lines the handler queued go out before its completion
                while let Ok(request) = requests.try_recv() {
                    session.handle_request(request);
                }
                session.complete(outcome);
            }
            Some(request) = requests.recv() => {
                session.handle_request(request);
            }
            _ = watchdog.expired() => {
                session.on_idle_timeout();
            }
        }
    }

    // A hook still running is left to finish on its own; its writes are dropped
    if let Some(handle) = in_flight {
        tracing::debug!("[{}] detaching hook still in flight", peer);
        drop(handle);
    }

    if let Err(e) = stream.shutdown().await {
        tracing::debug!("[{}] shutdown: {}", peer, e);
    }
    tracing::info!("[{}] session closed", peer);
    Ok(())
}

/// Write every queued frame, one write per frame
async fn flush(stream: &mut BoxedStream, session: &mut ImapSession) -> Result<(), SessionError> {
    let mut wrote = false;
    while let Some(frame) = session.next_frame() {
        stream.write_all(&frame).await?;
        wrote = true;
    }
    if wrote {
        stream.flush().await?;
    }
    Ok(())
}

/// Outcome of the hook in flight; never resolves when there is none
async fn finished(in_flight: &mut Option<JoinHandle<Outcome>>) -> Outcome {
    match in_flight {
        Some(handle) => joined(handle.await),
        None => std::future::pending().await,
    }
}
