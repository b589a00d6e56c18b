//! Status state machine.
//!
//! `Pending -> Running -> {Succeeded, Failed, Stopped}`. The reconciler is
//! pure: it consumes envelopes and poll results and returns the [`Effect`]s
//! the monitor must run. It is the only place that decides when timers
//! start or stop and when the report loader fires.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::status::progress::compute_progress;
use crate::status::{ExecutionRecord, Status, StatusEnvelope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartPolling,
    StopPolling,
    StartTicker,
    StopTicker,
    /// Persist the outcome on the execution record.
    RecordOutcome {
        status: Status,
        error_message: Option<String>,
    },
    LoadReport,
    /// Poll only the record store from now on.
    DisableTaskQueue,
}

/// Engine bookkeeping for one monitored execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub last_status: Status,
    pub is_polling: bool,
    pub poll_error_streak: u32,
    pub queue_disabled: bool,
}

/// Fields rendered by the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Visible {
    pub stage: Option<String>,
    pub progress: u8,
    pub executed_conversations: u64,
    pub total_conversations: u64,
    pub error_message: Option<String>,
    /// Status could not be determined at all. Distinct from `Failed`.
    pub blocking_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    sync: SyncState,
    visible: Visible,
    ticking: bool,
    report_requested: bool,
    streak_threshold: u32,
}

impl Reconciler {
    pub fn new(initial: Status, streak_threshold: u32) -> Self {
        Self {
            sync: SyncState {
                last_status: initial,
                is_polling: false,
                poll_error_streak: 0,
                queue_disabled: false,
            },
            visible: Visible::default(),
            ticking: false,
            report_requested: false,
            streak_threshold: streak_threshold.max(1),
        }
    }

    /// Show what the record already knows before the first poll lands.
    pub fn seed(&mut self, record: &ExecutionRecord) {
        self.visible.executed_conversations = record.executed_conversations;
        self.visible.total_conversations = record.total_conversations;
        self.visible.progress = if record.status == Status::Succeeded {
            100
        } else {
            compute_progress(record.executed_conversations, record.total_conversations, None)
        };
        self.visible.error_message = record.error_message.clone();
    }

    pub fn sync(&self) -> SyncState {
        self.sync
    }

    pub fn visible(&self) -> &Visible {
        &self.visible
    }

    /// Effects for starting to monitor an execution in its current status.
    /// Terminal executions are not monitored.
    pub fn begin(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.sync.last_status {
            Status::Pending => self.start_polling(&mut effects),
            Status::Running => {
                self.start_polling(&mut effects);
                self.start_ticker(&mut effects);
            }
            _ => {}
        }
        effects
    }

    /// Apply one envelope.
    pub fn apply(&mut self, envelope: &StatusEnvelope) -> Vec<Effect> {
        let current = self.sync.last_status;
        let next = envelope.classified();

        if current.is_terminal() {
            debug!(%current, %next, "ignoring envelope for terminal execution");
            return Vec::new();
        }

        self.merge_progress(envelope);

        // Pending after Running is a lagging source, not a real transition.
        if next == current || (current == Status::Running && next == Status::Pending) {
            debug!(status = %current, progress = self.visible.progress, "status unchanged");
            return Vec::new();
        }

        info!(from = %current, to = %next, "status transition");
        self.sync.last_status = next;

        let mut effects = Vec::new();
        match next {
            Status::Pending => self.start_polling(&mut effects),
            Status::Running => {
                self.start_polling(&mut effects);
                self.start_ticker(&mut effects);
            }
            Status::Succeeded => {
                self.stop_all(&mut effects);
                self.visible.error_message = None;
                self.visible.progress = 100;
                effects.push(Effect::RecordOutcome {
                    status: next,
                    error_message: None,
                });
                if !self.report_requested {
                    self.report_requested = true;
                    effects.push(Effect::LoadReport);
                }
            }
            Status::Failed => {
                self.stop_all(&mut effects);
                self.visible.error_message = envelope.error_message.clone();
                effects.push(Effect::RecordOutcome {
                    status: next,
                    error_message: envelope.error_message.clone(),
                });
            }
            Status::Stopped => {
                self.stop_all(&mut effects);
                effects.push(Effect::RecordOutcome {
                    status: next,
                    error_message: None,
                });
            }
        }
        effects
    }

    /// Track the poll-failure streak. Crossing the threshold disables the
    /// task-queue path for the rest of the session; the status is untouched.
    pub fn on_poll_result(&mut self, ok: bool) -> Vec<Effect> {
        if ok {
            self.sync.poll_error_streak = 0;
            return Vec::new();
        }

        self.sync.poll_error_streak = self.sync.poll_error_streak.saturating_add(1);
        if !self.sync.queue_disabled && self.sync.poll_error_streak >= self.streak_threshold {
            warn!(
                streak = self.sync.poll_error_streak,
                "poll failure streak reached, polling record store only"
            );
            self.sync.queue_disabled = true;
            return vec![Effect::DisableTaskQueue];
        }
        Vec::new()
    }

    /// The record store cannot tell us the status. Stop timers and surface a
    /// blocking error; `last_status` is kept as-is.
    pub fn on_fatal(&mut self, reason: &str) -> Vec<Effect> {
        warn!(%reason, "status undeterminable");
        self.visible.blocking_error = Some(reason.to_string());
        let mut effects = Vec::new();
        self.stop_all(&mut effects);
        effects
    }

    /// Effects for tearing the monitor down.
    pub fn teardown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.stop_all(&mut effects);
        effects
    }

    fn merge_progress(&mut self, envelope: &StatusEnvelope) {
        if envelope.stage.is_some() {
            self.visible.stage = envelope.stage.clone();
        }
        self.visible.progress = envelope.progress;
        self.visible.executed_conversations = envelope.executed_conversations;
        self.visible.total_conversations = envelope.total_conversations;
    }

    fn start_polling(&mut self, effects: &mut Vec<Effect>) {
        if !self.sync.is_polling {
            self.sync.is_polling = true;
            effects.push(Effect::StartPolling);
        }
    }

    fn start_ticker(&mut self, effects: &mut Vec<Effect>) {
        if !self.ticking {
            self.ticking = true;
            effects.push(Effect::StartTicker);
        }
    }

    fn stop_all(&mut self, effects: &mut Vec<Effect>) {
        if self.sync.is_polling {
            self.sync.is_polling = false;
            effects.push(Effect::StopPolling);
        }
        if self.ticking {
            self.ticking = false;
            effects.push(Effect::StopTicker);
        }
    }
}
