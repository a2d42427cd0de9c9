/// Logging setup with verbose mode support
///
/// `RUST_LOG` takes precedence; otherwise `--verbose` switches the default
/// level from `info` to `debug`, which includes every protocol line.

use tracing_subscriber::EnvFilter;

/// Default filter for the given verbosity
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "rosetta_imap=debug,imapd=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber; later calls are ignored
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
