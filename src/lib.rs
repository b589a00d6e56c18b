//! casewatch -- execution-status synchronization for chatbot test-case runs.
//!
//! Tracks a long-running test-case execution from submission to terminal
//! outcome by reconciling the task-queue status feed with the persisted
//! record store, and triggers report loading once on success.

pub mod api;
pub mod config;
pub mod engine;
pub mod sources;
pub mod status;
pub mod storage;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::engine::{Collaborators, ExecutionMonitor, MonitorSettings};
use crate::sources::http::HttpBackend;
use crate::sources::sqlite::SqliteRecordStore;
use crate::sources::{LogReportLoader, RecordStore};
use crate::status::{ExecutionId, ExecutionRecord, StatusEnvelope};

/// Which execution to follow and where its record lives.
#[derive(Debug, Clone)]
pub struct Target {
    pub execution: ExecutionId,
    /// Overrides the handle stored on the record.
    pub task_handle: Option<String>,
    /// Read records from this SQLite database instead of the REST API.
    pub db_path: Option<String>,
}

fn record_store(backend: &Arc<HttpBackend>, target: &Target) -> Result<Arc<dyn RecordStore>> {
    let store: Arc<dyn RecordStore> = match &target.db_path {
        Some(path) => {
            tracing::info!(%path, "reading records from SQLite");
            Arc::new(SqliteRecordStore::new(storage::open_pool(path)?))
        }
        None => backend.clone(),
    };
    Ok(store)
}

/// Fetch the execution's current record and build an (unstarted) monitor.
pub async fn open_monitor(config: &Config, target: &Target) -> Result<ExecutionMonitor> {
    let backend = Arc::new(HttpBackend::from_config(&config.api)?);
    let store = record_store(&backend, target)?;

    let payload = store.fetch_record(&target.execution).await?;
    let mut record = ExecutionRecord::from_payload(&payload);
    record.id = target.execution.clone();
    if let Some(handle) = &target.task_handle {
        record.task_handle = Some(handle.clone());
    }
    tracing::info!(execution = %record.id, status = %record.status, handle = ?record.task_handle, "execution loaded");

    Ok(ExecutionMonitor::new(
        record,
        Collaborators {
            queue: backend.clone(),
            store,
            control: Some(backend),
            reports: Arc::new(LogReportLoader),
        },
        MonitorSettings::from(config),
    ))
}

/// Run a single poll and return the envelope it produced.
pub async fn status_once(config: &Config, target: &Target) -> Result<engine::PollOutcome> {
    let backend = Arc::new(HttpBackend::from_config(&config.api)?);
    let store = record_store(&backend, target)?;

    let mut record = ExecutionRecord::submitted(target.execution.clone(), target.task_handle.clone());
    if record.task_handle.is_none() {
        if let Ok(payload) = store.fetch_record(&target.execution).await {
            record.task_handle = payload.task_id.filter(|h| !h.is_empty());
        }
    }

    let poller = engine::DualSourcePoller::new(backend, store);
    Ok(poller.poll(&record, true).await)
}

/// Request a stop and return the resulting envelope.
pub async fn stop(config: &Config, execution: &ExecutionId) -> Result<StatusEnvelope> {
    use crate::sources::ExecutionControl;

    let backend = HttpBackend::from_config(&config.api)?;
    let payload = backend.stop(execution).await?;
    Ok(StatusEnvelope::from_record(&payload))
}
