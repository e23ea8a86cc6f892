//! Execution log repository functions — best-effort log ingest.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ExecutionLog, LogSeverity};

/// One log line as submitted by `POST /logs`.
#[derive(Debug, Clone)]
pub struct LogEntryInput {
    pub execution_id: Uuid,
    pub sequence: i64,
    pub severity: LogSeverity,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

/// Insert a batch of log lines, silently ignoring duplicates of
/// `(tenant_id, execution_id, sequence)` — log ingest is best-effort and a
/// retried batch must not error.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure other than a
/// duplicate-sequence conflict.
pub async fn ingest_logs(pool: &PgPool, tenant_id: Uuid, entries: &[LogEntryInput]) -> Result<(), StoreError> {
    for entry in entries {
        sqlx::query(
            r"
            INSERT INTO execution_logs (tenant_id, execution_id, sequence, severity, message, emitted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, execution_id, sequence) DO NOTHING
            ",
        )
        .bind(tenant_id)
        .bind(entry.execution_id)
        .bind(entry.sequence)
        .bind(entry.severity)
        .bind(&entry.message)
        .bind(entry.emitted_at)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Stream (as a materialized vector) the log lines for one execution, in
/// sequence order.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_logs(pool: &PgPool, tenant_id: Uuid, execution_id: Uuid) -> Result<Vec<ExecutionLog>, StoreError> {
    let logs = sqlx::query_as::<_, ExecutionLog>(
        r"
        SELECT id, tenant_id, execution_id, sequence, severity, message, emitted_at, ingested_at
        FROM execution_logs WHERE tenant_id = $1 AND execution_id = $2
        ORDER BY sequence ASC
        ",
    )
    .bind(tenant_id)
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}
