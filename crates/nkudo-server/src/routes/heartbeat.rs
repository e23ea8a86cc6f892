//! `POST /heartbeat` (§4.4).

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nkudo_core::heartbeat::{self, HeartbeatRequest};
use nkudo_storage::host::HostFacts;
use nkudo_storage::microvm::MicroVmReport;
use nkudo_storage::models::{ConnectivityState, MicroVmState, Plan, PlanStatus};
use nkudo_storage::plan::PlanActionWithExecution;

use crate::error::AppError;
use crate::mtls::ClientIdentity;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/heartbeat", post(heartbeat))
}

#[derive(Debug, Deserialize)]
pub struct HostFactsWire {
    pub cpu_cores_total: i32,
    pub memory_bytes_total: i64,
    pub storage_bytes_total: i64,
    pub kvm_available: bool,
    pub hypervisor_available: bool,
}

impl From<HostFactsWire> for HostFacts {
    fn from(w: HostFactsWire) -> Self {
        Self {
            cpu_cores_total: w.cpu_cores_total,
            memory_bytes_total: w.memory_bytes_total,
            storage_bytes_total: w.storage_bytes_total,
            kvm_available: w.kvm_available,
            hypervisor_available: w.hypervisor_available,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MicroVmWire {
    pub name: String,
    pub state: MicroVmState,
    pub vcpu_count: i32,
    pub memory_mib: i32,
}

impl From<MicroVmWire> for MicroVmReport {
    fn from(w: MicroVmWire) -> Self {
        Self {
            name: w.name,
            state: w.state,
            vcpu_count: w.vcpu_count,
            memory_mib: w.memory_mib,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequestBody {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub host_id: Uuid,
    pub agent_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub host_facts: HostFactsWire,
    /// Overlay-mesh connectivity status as observed by the agent; accepted
    /// for forward compatibility but not yet folded into any stored state —
    /// `sites.connectivity_state` is derived purely from agent liveness
    /// (§4.4).
    pub mesh_status: Option<serde_json::Value>,
    #[serde(default)]
    pub vms: Vec<MicroVmWire>,
    #[serde(default)]
    pub shutdown: bool,
}

/// A leased plan together with the ordered actions the agent must execute
/// for it. The heartbeat response embeds actions directly so the dispatcher
/// never needs a second round-trip to start work it was just handed.
#[derive(Debug, Serialize)]
pub struct PendingPlanWire {
    #[serde(flatten)]
    pub plan: Plan,
    pub actions: Vec<PlanActionWithExecution>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponseBody {
    pub next_heartbeat_seconds: u32,
    pub pending_plans: Vec<PendingPlanWire>,
    pub site_connectivity: ConnectivityState,
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ClientIdentity>,
    Json(body): Json<HeartbeatRequestBody>,
) -> Result<Json<HeartbeatResponseBody>, AppError> {
    let client = identity.require()?;
    let now = Utc::now();

    let response = heartbeat::process_heartbeat(
        &state.pool,
        state.config.heartbeat_interval_secs,
        HeartbeatRequest {
            tenant_id: body.tenant_id,
            site_id: body.site_id,
            host_id: body.host_id,
            agent_id: body.agent_id,
            presented_cert_serial: client.serial_decimal.clone(),
            sent_at: body.sent_at,
            host_facts: body.host_facts.into(),
            vms: body.vms.into_iter().map(Into::into).collect(),
        },
        now,
    )
    .await?;

    // A plan whose lease has just been acquired is always IN_PROGRESS by
    // the time it is handed back (see `lease_next_plans`); assert this in
    // debug builds so drift here is caught by tests rather than agents.
    debug_assert!(response
        .pending_plans
        .iter()
        .all(|p| p.status == PlanStatus::InProgress));

    let mut pending_plans = Vec::with_capacity(response.pending_plans.len());
    for plan in response.pending_plans {
        let actions =
            nkudo_storage::plan::list_plan_actions_with_execution_ids(&state.pool, plan.tenant_id, plan.id)
                .await?;
        pending_plans.push(PendingPlanWire { plan, actions });
    }

    Ok(Json(HeartbeatResponseBody {
        next_heartbeat_seconds: response.next_heartbeat_seconds,
        pending_plans,
        site_connectivity: response.site_connectivity,
    }))
}
