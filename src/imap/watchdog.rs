/// Idle timer for a session

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone)]
pub struct IdleWatchdog {
    timeout: Duration,
    deadline: Instant,
}

impl IdleWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Push the deadline out by a full timeout from now
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolves once the current deadline has passed
    pub async fn expired(&self) {
        sleep_until(self.deadline).await;
    }
}
