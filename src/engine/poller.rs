//! Dual-source status poller.
//!
//! Sources are tried in a fixed order: the task queue while the execution
//! has a handle and the queue path is enabled, then the record store. A task
//! queue failure never reaches the caller; it only marks the outcome as
//! degraded and the store answers instead.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::sources::{RecordStore, TaskQueue};
use crate::status::{ExecutionRecord, StatusEnvelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    TaskQueue,
    RecordStore,
    /// Envelope pushed by the stop action rather than fetched by a poll.
    Control,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::TaskQueue => write!(f, "task_queue"),
            Source::RecordStore => write!(f, "record_store"),
            Source::Control => write!(f, "control"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Fresh {
        envelope: StatusEnvelope,
        source: Source,
        /// The task queue was tried and failed before `source` answered.
        queue_failed: bool,
        /// Task handle reported by the record store, if any.
        task_handle: Option<String>,
    },
    /// Neither source produced a status this tick.
    Unavailable { reason: String, queue_failed: bool },
    /// The record store answered with something that makes the execution's
    /// status undeterminable.
    Fatal { reason: String },
}

impl PollOutcome {
    /// `false` is the poll-failure signal that feeds the error streak.
    pub fn ok(&self) -> bool {
        matches!(
            self,
            PollOutcome::Fresh {
                queue_failed: false,
                ..
            }
        )
    }
}

pub struct DualSourcePoller {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn RecordStore>,
}

impl DualSourcePoller {
    pub fn new(queue: Arc<dyn TaskQueue>, store: Arc<dyn RecordStore>) -> Self {
        Self { queue, store }
    }

    /// Ordered fallback chain for one poll.
    pub fn plan(record: &ExecutionRecord, queue_enabled: bool) -> Vec<Source> {
        let mut chain = Vec::with_capacity(2);
        if queue_enabled && record.task_handle.is_some() {
            chain.push(Source::TaskQueue);
        }
        chain.push(Source::RecordStore);
        chain
    }

    /// Run one poll. Read-only, so polling the same tick twice is harmless;
    /// callers dedupe by sequence number.
    pub async fn poll(&self, record: &ExecutionRecord, queue_enabled: bool) -> PollOutcome {
        let mut queue_failed = false;

        for source in Self::plan(record, queue_enabled) {
            match source {
                Source::TaskQueue => {
                    let Some(handle) = record.task_handle.as_deref() else {
                        continue;
                    };
                    match self.queue.task_status(handle).await {
                        Ok(payload) => {
                            debug!(execution = %record.id, %handle, status = %payload.status, "task queue answered");
                            return PollOutcome::Fresh {
                                envelope: StatusEnvelope::from_task(&payload),
                                source,
                                queue_failed: false,
                                task_handle: None,
                            };
                        }
                        Err(e) => {
                            warn!(execution = %record.id, %handle, error = %e, "task status unavailable, falling back to record store");
                            queue_failed = true;
                        }
                    }
                }
                Source::RecordStore => {
                    return match self.store.fetch_record(&record.id).await {
                        Ok(payload) => PollOutcome::Fresh {
                            envelope: StatusEnvelope::from_record(&payload),
                            source,
                            queue_failed,
                            task_handle: payload.task_id.filter(|h| !h.is_empty()),
                        },
                        Err(e) if e.is_fatal() => PollOutcome::Fatal {
                            reason: e.to_string(),
                        },
                        Err(e) => {
                            warn!(execution = %record.id, error = %e, "record store unavailable");
                            PollOutcome::Unavailable {
                                reason: e.to_string(),
                                queue_failed,
                            }
                        }
                    };
                }
                Source::Control => {}
            }
        }

        PollOutcome::Unavailable {
            reason: "no source available".to_string(),
            queue_failed,
        }
    }
}
