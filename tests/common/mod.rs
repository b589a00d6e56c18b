//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use casewatch::engine::tracker::Clock;
use casewatch::engine::{Collaborators, ElapsedTracker, ExecutionMonitor, MonitorSettings};
use casewatch::sources::{
    ExecutionControl, RecordPayload, RecordStore, ReportLoader, SourceError, TaskQueue,
    TaskStatusPayload,
};
use casewatch::status::{ExecutionId, ExecutionRecord, Status};
use tokio::sync::Semaphore;

pub fn task(status: &str, executed: u64, total: u64) -> TaskStatusPayload {
    TaskStatusPayload {
        status: status.to_string(),
        stage: Some(format!("conversation {}/{}", executed, total)),
        progress: None,
        executed_conversations: Some(executed),
        total_conversations: Some(total),
        error_message: None,
    }
}

pub fn row(status: &str) -> RecordPayload {
    RecordPayload {
        status: status.to_string(),
        ..RecordPayload::default()
    }
}

/// Replays scripted replies; the last reply repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedQueue {
    replies: Mutex<VecDeque<Result<TaskStatusPayload, SourceError>>>,
    last: Mutex<Option<TaskStatusPayload>>,
    pub calls: AtomicUsize,
}

impl ScriptedQueue {
    pub fn ok(&self, payload: TaskStatusPayload) {
        self.replies.lock().unwrap().push_back(Ok(payload));
    }

    pub fn fail(&self, times: usize) {
        let mut replies = self.replies.lock().unwrap();
        for _ in 0..times {
            replies.push_back(Err(SourceError::Transport("connection refused".into())));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskQueue for ScriptedQueue {
    async fn task_status(&self, _handle: &str) -> Result<TaskStatusPayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(payload)) => {
                *self.last.lock().unwrap() = Some(payload.clone());
                Ok(payload)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| SourceError::Transport("connection refused".into())),
        }
    }
}

/// Record store with a settable row and an optional gate that holds each
/// fetch until a permit is released.
pub struct GatedStore {
    row: Mutex<Result<RecordPayload, u16>>,
    gate: Option<Semaphore>,
    pub calls: AtomicUsize,
}

impl GatedStore {
    pub fn open(payload: RecordPayload) -> Self {
        Self {
            row: Mutex::new(Ok(payload)),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(payload: RecordPayload) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::open(payload)
        }
    }

    pub fn set(&self, payload: RecordPayload) {
        *self.row.lock().unwrap() = Ok(payload);
    }

    /// Make fetches fail with the given HTTP status (404 is fatal).
    pub fn set_error(&self, status: u16) {
        *self.row.lock().unwrap() = Err(status);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn fetch_record(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let row = self.row.lock().unwrap().clone();
        match row {
            Ok(payload) => Ok(payload),
            Err(404) => Err(SourceError::NotFound { id: id.to_string() }),
            Err(status) => Err(SourceError::Remote {
                status,
                body: String::new(),
            }),
        }
    }
}

pub struct FixedControl(pub RecordPayload);

#[async_trait]
impl ExecutionControl for FixedControl {
    async fn stop(&self, _id: &ExecutionId) -> Result<RecordPayload, SourceError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct CountingReports {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<ExecutionRecord>>,
}

impl CountingReports {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReportLoader for CountingReports {
    async fn load_report(&self, record: &ExecutionRecord) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct Harness {
    pub monitor: ExecutionMonitor,
    pub queue: Arc<ScriptedQueue>,
    pub store: Arc<GatedStore>,
    pub reports: Arc<CountingReports>,
}

pub fn harness(
    status: Status,
    handle: Option<&str>,
    store: GatedStore,
    control: Option<Arc<dyn ExecutionControl>>,
) -> Harness {
    let tracker = ElapsedTracker::new(MonitorSettings::default().tick);
    build(status, handle, store, control, Utc::now(), tracker)
}

/// Harness whose elapsed tracker reads the tokio clock, so paused-time
/// tests see wall-clock seconds advance with `sleep`.
pub fn harness_with_paused_clock(status: Status, handle: Option<&str>, store: GatedStore) -> Harness {
    let started_at = Utc::now();
    let origin = tokio::time::Instant::now();
    let clock: Clock = Arc::new(move || {
        started_at + chrono::Duration::from_std(origin.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
    });
    let tracker = ElapsedTracker::with_clock(MonitorSettings::default().tick, clock);
    build(status, handle, store, None, started_at, tracker)
}

fn build(
    status: Status,
    handle: Option<&str>,
    store: GatedStore,
    control: Option<Arc<dyn ExecutionControl>>,
    started_at: DateTime<Utc>,
    tracker: ElapsedTracker,
) -> Harness {
    let queue = Arc::new(ScriptedQueue::default());
    let store = Arc::new(store);
    let reports = Arc::new(CountingReports::default());

    let mut record = ExecutionRecord::submitted(ExecutionId::new("exec-1"), handle.map(str::to_string));
    record.status = status;
    record.started_at = started_at;

    let monitor = ExecutionMonitor::with_tracker(
        record,
        Collaborators {
            queue: queue.clone(),
            store: store.clone(),
            control,
            reports: reports.clone(),
        },
        MonitorSettings::default(),
        tracker,
    );

    Harness {
        monitor,
        queue,
        store,
        reports,
    }
}
