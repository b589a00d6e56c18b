//! Identity and persisted outcome of one execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{classify, Status};
use crate::sources::RecordPayload;

/// Opaque execution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One test-case execution as known to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub status: Status,
    /// Present only if the execution was dispatched through the task queue.
    pub task_handle: Option<String>,
    pub executed_conversations: u64,
    /// Zero means the run is not conversation-based, or the total is unknown.
    pub total_conversations: u64,
    pub started_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl ExecutionRecord {
    /// Start tracking an execution that has just been submitted.
    pub fn submitted(id: ExecutionId, task_handle: Option<String>) -> Self {
        Self {
            id,
            status: Status::Pending,
            task_handle,
            executed_conversations: 0,
            total_conversations: 0,
            started_at: Utc::now(),
            error_message: None,
            result: None,
        }
    }

    /// Build a record from a persisted-store row.
    ///
    /// `started_at` falls back to now when the row carries no timestamp yet.
    pub fn from_payload(payload: &RecordPayload) -> Self {
        let status = classify(&payload.status);
        Self {
            id: ExecutionId::new(payload.id.to_string()),
            status,
            task_handle: payload.task_id.clone().filter(|h| !h.is_empty()),
            executed_conversations: payload.executed_conversations.unwrap_or(0),
            total_conversations: payload.total_conversations.unwrap_or(0),
            started_at: payload.executed_at.unwrap_or_else(Utc::now),
            error_message: if status == Status::Failed {
                payload.failure_message()
            } else {
                None
            },
            result: payload.result.clone(),
        }
    }

    /// Record a status change. Returns `false` and leaves the record
    /// untouched when it has already reached a terminal status.
    pub fn settle(&mut self, status: Status, error_message: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error_message = match status {
            Status::Failed => error_message,
            _ => None,
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status_is_immutable() {
        let mut record = ExecutionRecord::submitted(ExecutionId::new("7"), None);
        assert!(record.settle(Status::Running, None));
        assert!(record.settle(Status::Failed, Some("boom".into())));
        assert_eq!(record.error_message.as_deref(), Some("boom"));

        assert!(!record.settle(Status::Succeeded, None));
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_error_message_only_kept_on_failure() {
        let mut record = ExecutionRecord::submitted(ExecutionId::new("8"), None);
        assert!(record.settle(Status::Succeeded, Some("ignored".into())));
        assert_eq!(record.error_message, None);
    }
}
