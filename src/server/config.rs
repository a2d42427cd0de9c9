use crate::error::ConfigError;
use crate::imap::SessionSettings;
use crate::plugins::accounts::{AccountInfo, AccountsConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to accept IMAP connections on
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Name announced in the greeting
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Seconds of silence before a client is disconnected
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_max_literal_size")]
    pub max_literal_size: usize,
    /// Bytes a client may send ahead while a command is still running
    #[serde(default = "default_max_pending_input")]
    pub max_pending_input: usize,
    /// Capabilities advertised in every state
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    /// Certificate for STARTTLS; without it STARTTLS is not offered
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default = "default_mailboxes")]
    pub mailboxes: Vec<String>,
}

/// PEM files for STARTTLS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            hostname: default_hostname(),
            idle_timeout_secs: default_idle_timeout(),
            max_line_length: default_max_line_length(),
            max_literal_size: default_max_literal_size(),
            max_pending_input: default_max_pending_input(),
            capabilities: default_capabilities(),
            tls: None,
            accounts: AccountsConfig::default(),
            mailboxes: default_mailboxes(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:143".to_string()
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_max_line_length() -> usize {
    8192
}

fn default_max_literal_size() -> usize {
    1024 * 1024
}

fn default_max_pending_input() -> usize {
    2 * 1024 * 1024
}

fn default_capabilities() -> Vec<String> {
    vec!["IMAP4rev1".to_string()]
}

fn default_mailboxes() -> Vec<String> {
    ["INBOX", "Sent", "Drafts", "Trash", "Junk"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

impl ServerConfig {
    /// Load configuration from file, falling back to defaults, then apply
    /// environment overrides
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if fs::try_exists(path).await.unwrap_or(false) {
            let content = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        } else {
            tracing::info!("{} not found, using defaults", path.display());
            ServerConfig::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;

        Ok(config)
    }

    /// Apply `IMAP_LISTEN`, `IMAP_HOSTNAME` and `IMAP_IDLE_TIMEOUT`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(listen) = lookup("IMAP_LISTEN") {
            self.listen = listen;
        }
        if let Some(hostname) = lookup("IMAP_HOSTNAME") {
            self.hostname = hostname;
        }
        if let Some(timeout) = lookup("IMAP_IDLE_TIMEOUT") {
            self.idle_timeout_secs = timeout.parse().map_err(|_| ConfigError::Env {
                name: "IMAP_IDLE_TIMEOUT",
                value: timeout,
            })?;
        }
        Ok(())
    }

    /// Limits and identity handed to every session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            hostname: self.hostname.clone(),
            capabilities: self.capabilities.clone(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_line_length: self.max_line_length,
            max_literal_size: self.max_literal_size,
            max_pending_input: self.max_pending_input,
        }
    }

    /// Generate a sample configuration file
    pub fn sample() -> Result<String, ConfigError> {
        let mut users = HashMap::new();
        users.insert(
            "user@example.com".to_string(),
            AccountInfo {
                password_hash: "$argon2id$v=19$m=19456,t=2,p=1$EXAMPLE$HASH".to_string(),
            },
        );

        let sample = ServerConfig {
            hostname: "mail.example.com".to_string(),
            tls: Some(TlsConfig {
                cert_path: PathBuf::from("/etc/imapd/cert.pem"),
                key_path: PathBuf::from("/etc/imapd/key.pem"),
            }),
            accounts: AccountsConfig { users },
            ..ServerConfig::default()
        };
        Ok(toml::to_string_pretty(&sample)?)
    }
}
