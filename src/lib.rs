pub mod error;
pub mod imap;
pub mod logging;
pub mod plugins;
pub mod server;
