use crate::error::SessionError;
use crate::imap::{run_connection, HookRegistry, SessionSettings};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// Global connection ID counter
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Accept IMAP clients forever, one session task per connection
pub async fn run_listener(
    listener: TcpListener,
    settings: Arc<SessionSettings>,
    registry: Arc<HookRegistry>,
) -> Result<(), SessionError> {
    tracing::info!("IMAP listener started on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Usually fd exhaustion; the listener itself is fine
                tracing::warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let connection_id = CONNECTION_ID_COUNTER.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Connection {} accepted from {}", connection_id, addr);

        let settings = settings.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_tcp_connection(socket, addr, settings, registry).await {
                tracing::warn!("Connection {} from {} ended with error: {}", connection_id, addr, e);
            }
        });
    }
}

/// Handle a single TCP connection
async fn handle_tcp_connection(
    socket: TcpStream,
    addr: SocketAddr,
    settings: Arc<SessionSettings>,
    registry: Arc<HookRegistry>,
) -> Result<(), SessionError> {
    socket.set_nodelay(true)?;
    run_connection(Box::new(socket), addr, false, settings, registry).await
}
