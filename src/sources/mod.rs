//! Collaborators the engine reads from and acts on: the task queue, the
//! persisted record store, the report loader, and the stop action.

pub mod http;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::{ExecutionId, ExecutionRecord};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("execution {id} not found")]
    NotFound { id: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SourceError {
    /// Fatal errors mean the status cannot be determined at all. Everything
    /// else is a transient outage worth retrying on the next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::NotFound { .. } | SourceError::Decode(_) | SourceError::Storage(_)
        )
    }
}

/// Task-queue status payload for one job handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusPayload {
    pub status: String,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub executed_conversations: Option<u64>,
    #[serde(default)]
    pub total_conversations: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Row identifiers arrive as integers or strings depending on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl Default for RecordId {
    fn default() -> Self {
        RecordId::Text(String::new())
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordId::Int(n) => write!(f, "{}", n),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

/// Persisted execution row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPayload {
    #[serde(default)]
    pub id: RecordId,
    pub status: String,
    #[serde(default, alias = "celery_task_id")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub executed_conversations: Option<u64>,
    #[serde(default)]
    pub total_conversations: Option<u64>,
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RecordPayload {
    /// Human-readable failure text: the explicit message, else stderr.
    pub fn failure_message(&self) -> Option<String> {
        [&self.error_message, &self.stderr]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Task-queue status endpoint.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn task_status(&self, handle: &str) -> Result<TaskStatusPayload, SourceError>;
}

/// Durable store holding the authoritative outcome of an execution.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_record(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError>;
}

/// Requests that a backing execution be halted.
#[async_trait]
pub trait ExecutionControl: Send + Sync {
    async fn stop(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError>;
}

/// Invoked once when an execution succeeds, to fetch its reports.
#[async_trait]
pub trait ReportLoader: Send + Sync {
    async fn load_report(&self, record: &ExecutionRecord) -> anyhow::Result<()>;
}

/// Report loader that only logs the final outcome.
pub struct LogReportLoader;

#[async_trait]
impl ReportLoader for LogReportLoader {
    async fn load_report(&self, record: &ExecutionRecord) -> anyhow::Result<()> {
        let summary = record
            .result
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "<no result>".to_string());
        tracing::info!(
            execution = %record.id,
            conversations = record.executed_conversations,
            %summary,
            "Report ready"
        );
        Ok(())
    }
}
