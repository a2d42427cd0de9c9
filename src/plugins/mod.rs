/// Handlers shipped with the server
///
/// - `logger`: observes new connections
/// - `accounts`: AUTHENTICATE PLAIN (and LOGIN) against argon2 hashes
/// - `mailboxes`: LIST and SELECT over a configured folder list
/// - `starttls`: rustls upgrade, only when a certificate is configured

pub mod accounts;
pub mod logger;
pub mod mailboxes;
pub mod starttls;

use crate::error::ConfigError;
use crate::imap::hooks::{self, HookRegistry};
use crate::server::ServerConfig;
use std::sync::Arc;

pub use accounts::PlainAuthenticator;
pub use logger::ConnectionLogger;
pub use mailboxes::Mailboxes;
pub use starttls::StartTls;

/// Build the registry the server runs with
pub async fn default_registry(config: &ServerConfig) -> Result<HookRegistry, ConfigError> {
    let mut registry = HookRegistry::new();

    registry.register(hooks::CONNECTION, Arc::new(ConnectionLogger::new()));
    registry.register(
        hooks::auth_hook("PLAIN"),
        Arc::new(PlainAuthenticator::new(config.accounts.clone())),
    );

    let mailboxes = Arc::new(Mailboxes::new(config.mailboxes.clone()));
    registry.register(hooks::LIST, mailboxes.clone());
    registry.register(hooks::SELECT, mailboxes);

    match &config.tls {
        Some(tls) => registry.register(hooks::STARTTLS, Arc::new(StartTls::from_config(tls).await?)),
        None => tracing::info!("No TLS certificate configured, STARTTLS disabled"),
    }

    tracing::debug!("Hook registry: {:?}", registry);
    Ok(registry)
}
