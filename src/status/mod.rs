//! Execution status vocabulary: the status classifier, the progress
//! calculator, and the normalized per-poll status envelope.

pub mod envelope;
pub mod progress;
pub mod record;

pub use self::envelope::StatusEnvelope;
pub use self::progress::compute_progress;
pub use self::record::{ExecutionId, ExecutionRecord};

use serde::{Deserialize, Serialize};

/// Lifecycle status of one test-case execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl Status {
    /// Terminal statuses are sinks: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Stopped)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "pending"),
            Status::Running => write!(f, "running"),
            Status::Succeeded => write!(f, "succeeded"),
            Status::Failed => write!(f, "failed"),
            Status::Stopped => write!(f, "stopped"),
        }
    }
}

/// Map a raw status token from either source onto [`Status`].
///
/// Matching is case-insensitive and ignores surrounding whitespace. Tokens
/// that are not recognized classify as [`Status::Running`] so that an
/// unknown intermediate state is never mistaken for completion.
pub fn classify(token: &str) -> Status {
    match token.trim().to_ascii_lowercase().as_str() {
        "pending" | "queued" | "received" | "scheduled" | "created" => Status::Pending,
        "success" | "succeeded" | "completed" | "complete" | "done" => Status::Succeeded,
        "failure" | "failed" | "error" => Status::Failed,
        "revoked" | "stopped" | "cancelled" | "canceled" | "aborted" => Status::Stopped,
        _ => Status::Running,
    }
}
