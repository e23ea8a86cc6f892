//! Best-effort execution log ingest and operator-facing retrieval.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use nkudo_storage::execution_log::{self, LogEntryInput};
use nkudo_storage::models::{ExecutionLog, LogSeverity};

use crate::error::AppError;
use crate::mtls::ClientIdentity;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/logs", post(ingest_logs))
        .route("/executions/:execution_id/logs", get(list_logs))
}

#[derive(Debug, Deserialize)]
pub struct LogEntryWire {
    pub execution_id: Uuid,
    pub sequence: i64,
    pub severity: LogSeverity,
    pub message: String,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct IngestLogsRequestBody {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub entries: Vec<LogEntryWire>,
}

/// Best-effort ingest: a malformed or duplicate batch never blocks the
/// agent's dispatcher (§7), so the only failure this handler surfaces is a
/// genuine storage outage. The identity/CRL cross-check (§4.1, I6) is not
/// best-effort, though — `WebPkiClientVerifier` never consults the CRL, so
/// this is the one place standing between a revoked-but-unexpired cert and
/// log injection.
async fn ingest_logs(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<IngestLogsRequestBody>,
) -> Result<(), AppError> {
    let client = identity.require()?;
    nkudo_core::renewal::verify_agent_identity(&state.pool, body.tenant_id, body.agent_id, &client.serial_decimal)
        .await?;

    let entries: Vec<LogEntryInput> = body
        .entries
        .into_iter()
        .map(|e| LogEntryInput {
            execution_id: e.execution_id,
            sequence: e.sequence,
            severity: e.severity,
            message: e.message,
            emitted_at: e.emitted_at,
        })
        .collect();

    execution_log::ingest_logs(&state.pool, body.tenant_id, &entries).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    pub tenant_id: Uuid,
}

async fn list_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(execution_id): Path<Uuid>,
    Query(params): Query<ListLogsQuery>,
) -> Result<Json<Vec<ExecutionLog>>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let logs = execution_log::list_logs(&state.pool, params.tenant_id, execution_id).await?;
    Ok(Json(logs))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
