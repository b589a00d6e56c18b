//! Normalized result of a single poll.

use serde::Serialize;

use super::{classify, compute_progress, Status};
use crate::sources::{RecordPayload, TaskStatusPayload};

/// Snapshot of one poll, derived fresh from whichever source answered.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEnvelope {
    /// Raw status token as reported by the source.
    pub status: String,
    /// Free-text progress label.
    pub stage: Option<String>,
    pub progress: u8,
    pub executed_conversations: u64,
    pub total_conversations: u64,
    pub error_message: Option<String>,
}

impl StatusEnvelope {
    pub fn classified(&self) -> Status {
        classify(&self.status)
    }

    pub fn from_task(payload: &TaskStatusPayload) -> Self {
        let executed = payload.executed_conversations.unwrap_or(0);
        let total = payload.total_conversations.unwrap_or(0);
        Self {
            status: payload.status.clone(),
            stage: payload.stage.clone().filter(|s| !s.is_empty()),
            progress: compute_progress(executed, total, payload.progress),
            executed_conversations: executed,
            total_conversations: total,
            error_message: payload.error_message.clone(),
        }
    }

    pub fn from_record(payload: &RecordPayload) -> Self {
        let executed = payload.executed_conversations.unwrap_or(0);
        let total = payload.total_conversations.unwrap_or(0);
        let status = classify(&payload.status);
        // Finished rows without conversation counts still read as complete.
        let raw = match status {
            Status::Succeeded => Some(100.0),
            _ => None,
        };
        Self {
            status: payload.status.clone(),
            stage: None,
            progress: compute_progress(executed, total, raw),
            executed_conversations: executed,
            total_conversations: total,
            error_message: if status == Status::Failed {
                payload.failure_message()
            } else {
                None
            },
        }
    }
}
