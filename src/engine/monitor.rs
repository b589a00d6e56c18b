//! Per-execution monitor: owns the sync state and runs reconciler effects.
//!
//! Every poll takes a sequence number when it is issued. A response is
//! applied only if its number is higher than the last applied one and the
//! monitor has not been disposed, both checked under the state lock, so a
//! late or torn-down response can never overwrite newer state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::poller::{DualSourcePoller, PollOutcome, Source};
use super::reconciler::{Effect, Reconciler, SyncState, Visible};
use super::scheduler::PollScheduler;
use super::tracker::ElapsedTracker;
use crate::config::Config;
use crate::sources::{ExecutionControl, RecordStore, ReportLoader, TaskQueue};
use crate::status::{ExecutionId, ExecutionRecord, Status, StatusEnvelope};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub streak_threshold: u32,
    pub tick: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MonitorSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.polling.interval_ms),
            streak_threshold: config.polling.failure_streak_threshold,
            tick: Duration::from_millis(config.tracker.tick_ms),
        }
    }
}

/// External services the monitor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn TaskQueue>,
    pub store: Arc<dyn RecordStore>,
    pub control: Option<Arc<dyn ExecutionControl>>,
    pub reports: Arc<dyn ReportLoader>,
}

/// What a consumer renders for one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub execution_id: ExecutionId,
    pub status: Status,
    #[serde(flatten)]
    pub visible: Visible,
    pub sync: SyncState,
}

impl MonitorSnapshot {
    /// Nothing further will change without outside intervention.
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal() || self.visible.blocking_error.is_some()
    }
}

struct Core {
    record: ExecutionRecord,
    reconciler: Reconciler,
    last_applied_seq: u64,
    disposed: bool,
}

impl Core {
    fn snapshot(&self) -> MonitorSnapshot {
        let sync = self.reconciler.sync();
        MonitorSnapshot {
            execution_id: self.record.id.clone(),
            status: sync.last_status,
            visible: self.reconciler.visible().clone(),
            sync,
        }
    }
}

struct Shared {
    session: Uuid,
    settings: MonitorSettings,
    poller: DualSourcePoller,
    control: Option<Arc<dyn ExecutionControl>>,
    reports: Arc<dyn ReportLoader>,
    core: Mutex<Core>,
    next_seq: AtomicU64,
    in_flight: AtomicBool,
    scheduler: PollScheduler,
    tracker: ElapsedTracker,
    snapshot: watch::Sender<MonitorSnapshot>,
    report_task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag when a poll finishes or is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    fn issue_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn poll_once(self: &Arc<Self>) -> bool {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session = %self.session, "poll already in flight, skipping");
            return false;
        }
        let _guard = InFlight(&self.in_flight);

        let seq = self.issue_seq();
        let (record, queue_enabled) = {
            let core = self.core.lock();
            if core.disposed {
                return false;
            }
            (core.record.clone(), !core.reconciler.sync().queue_disabled)
        };

        let outcome = self.poller.poll(&record, queue_enabled).await;
        self.apply(seq, outcome)
    }

    /// Apply a poll outcome. Returns whether it was accepted.
    fn apply(self: &Arc<Self>, seq: u64, outcome: PollOutcome) -> bool {
        let mut core = self.core.lock();
        if core.disposed {
            debug!(session = %self.session, seq, "discarding response after teardown");
            return false;
        }
        if seq <= core.last_applied_seq {
            debug!(session = %self.session, seq, last = core.last_applied_seq, "discarding out-of-order response");
            return false;
        }
        core.last_applied_seq = seq;

        let mut effects = Vec::new();
        match outcome {
            PollOutcome::Fresh {
                envelope,
                source,
                queue_failed,
                task_handle,
            } => {
                if source != Source::Control {
                    effects.extend(core.reconciler.on_poll_result(!queue_failed));
                }
                if core.record.task_handle.is_none() {
                    if let Some(handle) = task_handle {
                        info!(execution = %core.record.id, %handle, "task handle discovered");
                        core.record.task_handle = Some(handle);
                    }
                }
                core.record.executed_conversations = envelope.executed_conversations;
                core.record.total_conversations = envelope.total_conversations;
                debug!(execution = %core.record.id, seq, %source, status = %envelope.status, "applying envelope");
                effects.extend(core.reconciler.apply(&envelope));
            }
            PollOutcome::Unavailable { reason, queue_failed } => {
                warn!(execution = %core.record.id, seq, %reason, "no status this tick");
                // Only queue failures count toward disabling the queue.
                if queue_failed {
                    effects.extend(core.reconciler.on_poll_result(false));
                }
            }
            PollOutcome::Fatal { reason } => {
                error!(execution = %core.record.id, seq, %reason, "cannot determine execution status");
                effects.extend(core.reconciler.on_fatal(&reason));
            }
        }

        self.run_effects(&mut core, effects);
        self.snapshot.send_replace(core.snapshot());
        true
    }

    fn run_effects(self: &Arc<Self>, core: &mut Core, effects: Vec<Effect>) {
        for effect in effects {
            debug!(execution = %core.record.id, ?effect, "effect");
            match effect {
                Effect::StartPolling => self.start_polling(),
                Effect::StopPolling => {
                    self.scheduler.stop();
                }
                Effect::StartTicker => {
                    self.tracker.start(core.record.started_at);
                }
                Effect::StopTicker => {
                    self.tracker.stop();
                }
                Effect::RecordOutcome {
                    status,
                    error_message,
                } => {
                    if !core.record.settle(status, error_message) {
                        warn!(execution = %core.record.id, %status, "record already terminal");
                    }
                }
                Effect::LoadReport => self.spawn_report_load(core.record.clone()),
                Effect::DisableTaskQueue => {
                    info!(execution = %core.record.id, "task queue disabled for this session");
                }
            }
        }
    }

    fn start_polling(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.start(self.settings.poll_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    shared.poll_once().await;
                }
            }
        });
    }

    fn spawn_report_load(&self, record: ExecutionRecord) {
        let reports = self.reports.clone();
        let handle = tokio::spawn(async move {
            info!(execution = %record.id, "loading report");
            if let Err(e) = reports.load_report(&record).await {
                error!(execution = %record.id, error = %e, "report load failed");
            }
        });
        *self.report_task.lock() = Some(handle);
    }
}

/// Tracks one execution from submission to its terminal outcome.
pub struct ExecutionMonitor {
    shared: Arc<Shared>,
}

impl ExecutionMonitor {
    pub fn new(record: ExecutionRecord, collaborators: Collaborators, settings: MonitorSettings) -> Self {
        let tracker = ElapsedTracker::new(settings.tick);
        Self::with_tracker(record, collaborators, settings, tracker)
    }

    /// Build a monitor around a caller-supplied elapsed tracker, e.g. one
    /// driven by a fake clock.
    pub fn with_tracker(
        record: ExecutionRecord,
        collaborators: Collaborators,
        settings: MonitorSettings,
        tracker: ElapsedTracker,
    ) -> Self {
        let mut reconciler = Reconciler::new(record.status, settings.streak_threshold);
        reconciler.seed(&record);
        let core = Core {
            record,
            reconciler,
            last_applied_seq: 0,
            disposed: false,
        };
        let (snapshot, _) = watch::channel(core.snapshot());

        Self {
            shared: Arc::new(Shared {
                session: Uuid::new_v4(),
                poller: DualSourcePoller::new(collaborators.queue, collaborators.store),
                control: collaborators.control,
                reports: collaborators.reports,
                core: Mutex::new(core),
                next_seq: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                scheduler: PollScheduler::new(),
                tracker,
                snapshot,
                report_task: Mutex::new(None),
                settings,
            }),
        }
    }

    pub fn session(&self) -> Uuid {
        self.shared.session
    }

    /// Begin monitoring. Pending and running executions start polling;
    /// terminal ones are left alone.
    pub fn start(&self) {
        let mut core = self.shared.core.lock();
        if core.disposed {
            return;
        }
        info!(
            session = %self.shared.session,
            execution = %core.record.id,
            status = %core.record.status,
            "monitor started"
        );
        let effects = core.reconciler.begin();
        self.shared.run_effects(&mut core, effects);
        self.shared.snapshot.send_replace(core.snapshot());
    }

    /// Poll once outside the timer. Skipped when a poll is already in flight.
    pub async fn refresh(&self) -> bool {
        self.shared.poll_once().await
    }

    /// Feed an externally obtained envelope, ordered after every poll issued so far.
    pub fn observe(&self, envelope: StatusEnvelope) -> bool {
        let seq = self.shared.issue_seq();
        self.shared.apply(
            seq,
            PollOutcome::Fresh {
                envelope,
                source: Source::Control,
                queue_failed: false,
                task_handle: None,
            },
        )
    }

    /// Ask the backend to halt the execution and apply what it returns.
    /// A poll still in flight when this resolves is discarded.
    pub async fn request_stop(&self) -> Result<MonitorSnapshot> {
        let control = self
            .shared
            .control
            .clone()
            .ok_or_else(|| anyhow!("no stop action configured"))?;
        let id = self.shared.core.lock().record.id.clone();

        info!(execution = %id, "requesting stop");
        let payload = control.stop(&id).await?;
        self.observe(StatusEnvelope::from_record(&payload));
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.shared.tracker.subscribe()
    }

    pub fn record(&self) -> ExecutionRecord {
        self.shared.core.lock().record.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.shared.scheduler.is_running()
    }

    pub fn is_ticking(&self) -> bool {
        self.shared.tracker.is_running()
    }

    /// Resolve once the execution settles and any report load has finished.
    pub async fn wait_settled(&self) -> Result<MonitorSnapshot> {
        let mut rx = self.subscribe();
        let settled = rx
            .wait_for(MonitorSnapshot::is_settled)
            .await
            .map_err(|_| anyhow!("monitor shut down before the execution settled"))?
            .clone();

        let pending = self.shared.report_task.lock().take();
        if let Some(task) = pending {
            if let Err(e) = task.await {
                warn!(error = %e, "report task did not complete");
            }
        }
        Ok(settled)
    }

    /// Stop all timers and drop any in-flight or future responses.
    /// Idempotent.
    pub fn dispose(&self) {
        let mut core = self.shared.core.lock();
        if core.disposed {
            return;
        }
        core.disposed = true;
        core.reconciler.teardown();
        self.shared.scheduler.stop();
        self.shared.tracker.stop();
        if let Some(task) = self.shared.report_task.lock().take() {
            task.abort();
        }
        debug!(session = %self.shared.session, execution = %core.record.id, "monitor disposed");
    }
}

impl Drop for ExecutionMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}
