//! Record store backed by the platform's SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{RecordId, RecordPayload, RecordStore, SourceError};
use crate::status::ExecutionId;
use crate::storage::Pool;

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: Pool,
}

impl SqliteRecordStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn storage(e: impl std::fmt::Display) -> SourceError {
    SourceError::Storage(e.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn fetch_record(&self, id: &ExecutionId) -> Result<RecordPayload, SourceError> {
        let pool = self.pool.clone();
        let key = id.as_str().to_string();

        let row = tokio::task::spawn_blocking(move || -> Result<Option<RecordPayload>, SourceError> {
            let conn = pool.get().map_err(storage)?;
            conn.query_row(
                "SELECT id, status, task_id, executed_conversations, total_conversations,
                        executed_at, result_json, stdout, stderr, error_message
                 FROM executions WHERE id = ?1",
                params![key],
                |row| {
                    let executed_at: Option<String> = row.get(5)?;
                    let result_json: Option<String> = row.get(6)?;
                    Ok(RecordPayload {
                        id: RecordId::Text(row.get(0)?),
                        status: row.get(1)?,
                        task_id: row.get(2)?,
                        executed_conversations: row.get::<_, Option<i64>>(3)?.map(|n| n.max(0) as u64),
                        total_conversations: row.get::<_, Option<i64>>(4)?.map(|n| n.max(0) as u64),
                        executed_at: executed_at
                            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                            .map(|t| t.with_timezone(&Utc)),
                        result: result_json.and_then(|r| serde_json::from_str(&r).ok()),
                        stdout: row.get(7)?,
                        stderr: row.get(8)?,
                        error_message: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(storage)
        })
        .await
        .map_err(storage)??;

        row.ok_or_else(|| SourceError::NotFound {
            id: id.as_str().to_string(),
        })
    }
}
