//! Per-request deadline.

use std::future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// A deadline that fires at most once and can be disarmed.
///
/// [`Watchdog::expired`] resolves when the deadline passes while armed; once it has
/// fired, or after [`Watchdog::disarm`], it stays pending forever. That makes it safe
/// to race in a `tokio::select!` loop.
#[derive(Debug)]
pub struct Watchdog {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    fired: bool,
}

impl Watchdog {
    /// Arm a deadline `timeout` from now.
    #[must_use]
    pub fn armed(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            deadline: Some(Instant::now() + timeout),
            fired: false,
        }
    }

    /// A watchdog that never fires.
    #[must_use]
    pub const fn disarmed() -> Self {
        Self {
            timeout: None,
            deadline: None,
            fired: false,
        }
    }

    /// Stop the deadline; a no-op after firing.
    pub const fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Whether the deadline has fired.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    /// Whether the deadline is still pending.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// The configured timeout, if one was armed.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve once when the armed deadline passes.
    pub async fn expired(&mut self) {
        let Some(deadline) = self.deadline else {
            return future::pending().await;
        };
        sleep_until(deadline).await;
        self.deadline = None;
        self.fired = true;
    }
}
