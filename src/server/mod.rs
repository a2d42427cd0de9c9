pub mod config;
pub mod tcp;

pub use config::{ServerConfig, TlsConfig};
pub use tcp::run_listener;
