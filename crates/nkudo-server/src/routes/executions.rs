//! Per-action result reporting and operator-facing execution listing (§4.3).

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use nkudo_storage::models::{Execution, Plan};
use nkudo_storage::plan::{self, ActionResultReport};

use crate::error::AppError;
use crate::mtls::ClientIdentity;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/executions/result", post(report_results))
        .route("/sites/:site_id/executions", get(list_executions))
}

#[derive(Debug, Deserialize)]
pub struct ActionResultWire {
    pub operation_id: String,
    pub ok: bool,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub host_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ReportResultsRequestBody {
    pub tenant_id: Uuid,
    pub plan_id: Uuid,
    pub agent_id: Uuid,
    pub results: Vec<ActionResultWire>,
}

async fn report_results(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<ReportResultsRequestBody>,
) -> Result<Json<Plan>, AppError> {
    let client = identity.require()?;
    nkudo_core::renewal::verify_agent_identity(&state.pool, body.tenant_id, body.agent_id, &client.serial_decimal)
        .await?;
    let now = Utc::now();

    let results: Vec<ActionResultReport> = body
        .results
        .into_iter()
        .map(|r| ActionResultReport {
            operation_id: r.operation_id,
            ok: r.ok,
            error_code: r.error_code,
            error_message: r.error_message,
            started_at: r.started_at,
            finished_at: r.finished_at,
            host_id: r.host_id,
        })
        .collect();

    let lease_ttl_secs = (i64::from(state.config.heartbeat_interval_secs) * 2).max(60);

    let plan = plan::report_results(
        &state.pool,
        body.tenant_id,
        body.plan_id,
        body.agent_id,
        &results,
        lease_ttl_secs,
        now,
    )
    .await?;

    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    pub tenant_id: Uuid,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(site_id): Path<Uuid>,
    Query(params): Query<ListExecutionsQuery>,
) -> Result<Json<Vec<Execution>>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let executions =
        plan::list_site_executions(&state.pool, params.tenant_id, site_id, params.limit).await?;
    Ok(Json(executions))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
