//! Bounded readiness wait.
//!
//! [`Poller::wait_for`] calls a side-effect-free probe at a fixed interval
//! until it yields a value or the timeout elapses. This is a plain spin-wait:
//! no backoff, no jitter. Time comes from tokio's clock, so tests can pause
//! and auto-advance it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::error::ReadinessError;

/// Default gap between probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shorter intervals are raised to this; zero would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default upper bound on a single wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT)
    }
}

impl Poller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            timeout,
            shutdown: None,
        }
    }

    /// Abort waits once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe until `probe` returns `Some` or the timeout elapses.
    ///
    /// The probe runs once immediately and then every `interval`, with a
    /// final probe at the deadline itself.
    pub async fn wait_for<T, F>(&self, description: &str, mut probe: F) -> Result<T, ReadinessError>
    where
        F: FnMut() -> Option<T>,
    {
        let started = Instant::now();
        // `None`: the timeout lies beyond what the clock can represent.
        let deadline = started.checked_add(self.timeout);
        let mut shutdown = self.shutdown.clone();
        let mut attempts: u32 = 0;

        loop {
            if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(cancelled(description));
            }

            attempts += 1;
            if let Some(value) = probe() {
                debug!(probe = description, attempts, elapsed = ?started.elapsed(), "probe ready");
                return Ok(value);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(ReadinessError::Timeout {
                    probe: description.to_string(),
                    elapsed: now - started,
                });
            }
            trace!(probe = description, attempts, "not ready yet");

            let wake_at = match (now.checked_add(self.interval), deadline) {
                (Some(next), Some(deadline)) => Some(next.min(deadline)),
                (next, deadline) => next.or(deadline),
            };
            if nap_until(wake_at, &mut shutdown).await {
                return Err(cancelled(description));
            }
        }
    }
}

fn cancelled(description: &str) -> ReadinessError {
    ReadinessError::Cancelled {
        probe: description.to_string(),
    }
}

/// Sleep for `duration`, returning `true` if shutdown is or becomes requested.
pub(crate) async fn sleep_unless_shutdown(duration: Duration, mut shutdown: Option<watch::Receiver<bool>>) -> bool {
    if shutdown.as_ref().is_some_and(|rx| *rx.borrow()) {
        return true;
    }
    nap_until(Instant::now().checked_add(duration), &mut shutdown).await
}

/// Sleep until `wake_at`, returning `true` if shutdown was requested first.
///
/// Shutdown notifications that do not cancel keep the original wake time.
async fn nap_until(wake_at: Option<Instant>, shutdown: &mut Option<watch::Receiver<bool>>) -> bool {
    loop {
        let timer = async {
            match wake_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        let Some(rx) = shutdown.as_mut() else {
            timer.await;
            return false;
        };

        let mut sender_gone = false;
        tokio::select! {
            _ = timer => return false,
            changed = rx.changed() => sender_gone = changed.is_err(),
        }
        if sender_gone {
            // A dropped sender can never cancel us; stop watching it.
            *shutdown = None;
        } else if *rx.borrow() {
            return true;
        }
    }
}
