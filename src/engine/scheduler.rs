//! Repeating poll timer.
//!
//! At most one timer is active per scheduler. Each tick awaits the poll
//! before the next tick is scheduled, so polls never overlap; a slow poll
//! delays the following tick instead of stacking up.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Default)]
pub struct PollScheduler {
    active: Mutex<Option<CancellationToken>>,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `interval`, first tick immediately. Returns
    /// `false` without doing anything when a timer is already running.
    pub fn start<F, Fut>(&self, interval: Duration, poll_fn: F) -> bool
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut active = self.active.lock();
        if active.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // Dropping the poll future on cancel discards any in-flight
                // response.
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = poll_fn() => {}
                }
            }
            debug!("poll timer exited");
        });

        *active = Some(token);
        debug!(interval_ms = interval.as_millis() as u64, "poll timer started");
        true
    }

    /// Stop the timer. Idempotent; returns whether a timer was running.
    pub fn stop(&self) -> bool {
        match self.active.lock().take() {
            Some(token) => {
                token.cancel();
                debug!("poll timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
