/// Observer on the `connection` hook

use crate::imap::{HookCall, HookContext, HookHandler, Outcome};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ConnectionLogger {
    seen: AtomicU64,
}

impl ConnectionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections announced so far
    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

impl HookHandler for ConnectionLogger {
    fn name(&self) -> &str {
        "logger"
    }

    fn handle<'a>(&'a self, ctx: &'a HookContext, _call: &'a HookCall) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let total = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
            let address = ctx.note("remote_address").await.unwrap_or_default();
            tracing::info!(
                "New connection from {} (secure: {}, #{})",
                address,
                ctx.is_secure(),
                total
            );
            Outcome::none()
        })
    }
}
