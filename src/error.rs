/// Error types for the session engine, hook pipeline and configuration

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end or disturb a single session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line exceeds {limit} bytes without a delimiter")]
    LineTooLong { limit: usize },

    #[error("More than {limit} bytes buffered while a command is in progress")]
    InputOverflow { limit: usize },

    #[error("Literal of {size} bytes exceeds the {limit} byte limit")]
    LiteralTooLarge { size: usize, limit: usize },

    #[error("Transport upgrade failed: {0}")]
    Upgrade(String),
}

/// Errors reported by hook handlers or by the session on their behalf
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Handler panicked")]
    Panicked,

    #[error("A continuation request is already pending")]
    ContinuationPending,

    #[error("Session closed")]
    SessionClosed,
}

impl HookError {
    pub fn handler(message: impl Into<String>) -> Self {
        HookError::Handler(message.into())
    }
}

/// Errors raised while loading configuration or building plugins from it
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),
}
