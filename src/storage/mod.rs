//! SQLite storage layer -- execution rows shared with the platform database.

pub mod schema;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::sources::RecordPayload;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every connection of a `memory()`
/// manager is its own database, so the pool is capped at one.
pub fn open_memory_pool() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// Insert or replace an execution row.
pub fn upsert_execution(pool: &Pool, row: &RecordPayload) -> Result<()> {
    let conn = pool.get()?;
    let result_json = row.result.as_ref().map(|r| r.to_string());
    let executed_at = row.executed_at.map(|t| t.to_rfc3339());

    conn.execute(
        "INSERT INTO executions (id, status, task_id, executed_conversations, total_conversations,
                                 executed_at, result_json, stdout, stderr, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            task_id = excluded.task_id,
            executed_conversations = excluded.executed_conversations,
            total_conversations = excluded.total_conversations,
            executed_at = excluded.executed_at,
            result_json = excluded.result_json,
            stdout = excluded.stdout,
            stderr = excluded.stderr,
            error_message = excluded.error_message,
            updated_at = datetime('now')",
        rusqlite::params![
            row.id.to_string(),
            row.status,
            row.task_id,
            row.executed_conversations.map(|n| n as i64),
            row.total_conversations.map(|n| n as i64),
            executed_at,
            result_json,
            row.stdout,
            row.stderr,
            row.error_message,
        ],
    )?;

    Ok(())
}
