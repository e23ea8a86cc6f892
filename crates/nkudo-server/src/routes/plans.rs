//! Plan submission, leasing projection, and cancellation (§4.3).

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nkudo_storage::models::{Execution, OperationType, Plan};
use nkudo_storage::plan::{self, PlanActionInput};

use crate::error::AppError;
use crate::mtls::ClientIdentity;
use crate::routes::heartbeat::PendingPlanWire;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sites/:site_id/plans", post(submit_plan))
        .route("/sites/:site_id/plans/:plan_id/cancel", post(cancel_plan))
        .route("/plans/next", get(next_plans))
}

#[derive(Debug, Deserialize)]
pub struct PlanActionWire {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub vm_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubmitPlanRequestBody {
    pub tenant_id: Uuid,
    pub idempotency_key: String,
    pub client_request_id: Option<String>,
    pub actions: Vec<PlanActionWire>,
}

#[derive(Debug, Serialize)]
pub struct SubmitPlanResponseBody {
    pub plan: Plan,
    pub executions: Vec<Execution>,
    pub deduplicated: bool,
}

async fn submit_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(site_id): Path<Uuid>,
    Json(body): Json<SubmitPlanRequestBody>,
) -> Result<Json<SubmitPlanResponseBody>, AppError> {
    state.check_control_token(bearer_token(&headers))?;

    let actions: Vec<PlanActionInput> = body
        .actions
        .into_iter()
        .map(|a| PlanActionInput {
            operation_id: a.operation_id,
            operation_type: a.operation_type,
            vm_id: a.vm_id,
            payload: a.payload,
        })
        .collect();

    let (plan, executions, deduplicated) = plan::submit_plan(
        &state.pool,
        body.tenant_id,
        site_id,
        &body.idempotency_key,
        body.client_request_id.as_deref(),
        &actions,
    )
    .await?;

    Ok(Json(SubmitPlanResponseBody {
        plan,
        executions,
        deduplicated,
    }))
}

async fn cancel_plan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((_site_id, plan_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<TenantQuery>,
) -> Result<Json<Plan>, AppError> {
    state.check_control_token(bearer_token(&headers))?;
    let plan = plan::cancel_plan(&state.pool, params.tenant_id, plan_id, Utc::now()).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct NextPlansQuery {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub agent_id: Uuid,
}

/// Read-only projection of an agent's currently leased plans — never
/// mutates a lease (§9 open question: heartbeat is the sole leaser).
async fn next_plans(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Query(params): Query<NextPlansQuery>,
) -> Result<Json<Vec<PendingPlanWire>>, AppError> {
    identity.require()?;
    let plans = plan::list_leased_plans(&state.pool, params.tenant_id, params.site_id, params.agent_id).await?;

    let mut wire = Vec::with_capacity(plans.len());
    for plan in plans {
        let actions =
            nkudo_storage::plan::list_plan_actions_with_execution_ids(&state.pool, plan.tenant_id, plan.id)
                .await?;
        wire.push(PendingPlanWire { plan, actions });
    }
    Ok(Json(wire))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
