/// STARTTLS handler: wraps the session's stream in rustls

use crate::error::ConfigError;
use crate::imap::{BoxedStream, HookCall, HookContext, HookHandler, Outcome, TransportUpgrade};
use crate::server::TlsConfig;
use ::pem::{parse as pem_parse, parse_many as pem_parse_many};
use futures_util::future::BoxFuture;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io;
use std::sync::Arc;
use tokio::fs;
use tokio_rustls::TlsAcceptor;

#[derive(Clone)]
pub struct StartTls {
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for StartTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StartTls")
    }
}

impl StartTls {
    /// Read the configured PEM files
    pub async fn from_config(tls: &TlsConfig) -> Result<Self, ConfigError> {
        let cert_pem = fs::read_to_string(&tls.cert_path)
            .await
            .map_err(|source| ConfigError::Read {
                path: tls.cert_path.clone(),
                source,
            })?;
        let key_pem = fs::read_to_string(&tls.key_path)
            .await
            .map_err(|source| ConfigError::Read {
                path: tls.key_path.clone(),
                source,
            })?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, ConfigError> {
        let cert_chain = cert_chain(cert_pem)?;
        let private_key = private_key(key_pem)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| ConfigError::Tls(e.to_string()))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

/// Certificate chain as rustls CertificateDer
fn cert_chain(cert_pem: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs: Vec<CertificateDer<'static>> = pem_parse_many(cert_pem)
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| CertificateDer::from(p.into_contents()))
        .collect();

    if certs.is_empty() {
        return Err(ConfigError::Tls("no certificate found in PEM".to_string()));
    }
    Ok(certs)
}

/// Private key as rustls PrivateKeyDer
fn private_key(key_pem: &str) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let p = pem_parse(key_pem).map_err(|e| ConfigError::Tls(e.to_string()))?;
    let tag = p.tag().to_string();
    let contents = p.into_contents();
    match tag.as_str() {
        "PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs8(contents.into())),
        "EC PRIVATE KEY" => Ok(PrivateKeyDer::Sec1(contents.into())),
        "RSA PRIVATE KEY" => Ok(PrivateKeyDer::Pkcs1(contents.into())),
        other => Err(ConfigError::Tls(format!("unknown private key format: {}", other))),
    }
}

/// Server side TLS handshake over the existing stream
struct TlsUpgrade {
    acceptor: TlsAcceptor,
}

impl TransportUpgrade for TlsUpgrade {
    fn upgrade(self: Box<Self>, stream: BoxedStream) -> BoxFuture<'static, io::Result<BoxedStream>> {
        Box::pin(async move {
            let tls = self.acceptor.accept(stream).await?;
            Ok(Box::new(tls) as BoxedStream)
        })
    }
}

impl HookHandler for StartTls {
    fn name(&self) -> &str {
        "starttls"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            if ctx.is_secure() {
                return Outcome::bad("TLS already active");
            }
            let upgrade = TlsUpgrade {
                acceptor: self.acceptor.clone(),
            };
            match ctx.upgrade_transport(Box::new(upgrade)) {
                Ok(()) => Outcome::ok_with("Begin TLS negotiation now"),
                Err(e) => Outcome::error(e),
            }
        })
    }
}
