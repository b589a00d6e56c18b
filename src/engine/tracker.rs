//! One-second elapsed-time ticker for running executions.
//!
//! Each tick recomputes `now - started_at` from the clock instead of
//! incrementing a counter, so suspended or delayed ticks catch up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct ElapsedTracker {
    tick: Duration,
    clock: Clock,
    elapsed: Arc<watch::Sender<u64>>,
    active: Mutex<Option<CancellationToken>>,
}

impl ElapsedTracker {
    pub fn new(tick: Duration) -> Self {
        Self::with_clock(tick, Arc::new(Utc::now))
    }

    pub fn with_clock(tick: Duration, clock: Clock) -> Self {
        let (elapsed, _) = watch::channel(0);
        Self {
            tick,
            clock,
            elapsed: Arc::new(elapsed),
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.elapsed.subscribe()
    }

    pub fn current(&self) -> u64 {
        *self.elapsed.borrow()
    }

    /// Start ticking. No-op when already active.
    pub fn start(&self, started_at: DateTime<Utc>) -> bool {
        let mut active = self.active.lock();
        if active.is_some() {
            return false;
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let clock = self.clock.clone();
        let tx = self.elapsed.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = elapsed_secs(started_at, clock());
                        // Never step backwards, even if the clock does.
                        tx.send_if_modified(|value| {
                            if now > *value {
                                *value = now;
                                true
                            } else {
                                false
                            }
                        });
                    }
                }
            }
        });

        *active = Some(token);
        debug!(%started_at, "elapsed tracker started");
        true
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&self) -> bool {
        match self.active.lock().take() {
            Some(token) => {
                token.cancel();
                debug!(elapsed = self.current(), "elapsed tracker stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for ElapsedTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Whole seconds between `started_at` and `now`, floored at zero.
pub fn elapsed_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn fake_clock(base: DateTime<Utc>) -> (Arc<AtomicI64>, Clock) {
        let offset = Arc::new(AtomicI64::new(0));
        let o = offset.clone();
        let clock: Clock = Arc::new(move || base + chrono::Duration::seconds(o.load(Ordering::SeqCst)));
        (offset, clock)
    }

    #[test]
    fn test_elapsed_secs_floors_at_zero() {
        let t0 = Utc::now();
        assert_eq!(elapsed_secs(t0, t0 + chrono::Duration::seconds(90)), 90);
        assert_eq!(elapsed_secs(t0, t0 - chrono::Duration::seconds(5)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recomputes_from_clock_and_never_regresses() {
        let started = Utc::now();
        let (offset, clock) = fake_clock(started);
        let tracker = ElapsedTracker::with_clock(Duration::from_secs(1), clock);
        tracker.start(started);

        offset.store(5, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(tracker.current(), 5);

        // Suspended tab: the clock jumps far ahead between ticks.
        offset.store(600, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.current(), 600);

        // Clock skew backwards must not lower the value.
        offset.store(300, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(tracker.current(), 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let started = Utc::now();
        let (offset, clock) = fake_clock(started);
        let tracker = ElapsedTracker::with_clock(Duration::from_secs(1), clock);
        assert!(tracker.start(started));
        assert!(!tracker.start(started));

        offset.store(3, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(tracker.stop());
        assert!(!tracker.stop());

        offset.store(50, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.current(), 3);
    }
}
