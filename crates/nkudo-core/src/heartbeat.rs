//! Heartbeat orchestration (§4.4): the one request type that updates host
//! facts, agent liveness, site connectivity, MicroVM inventory, and leases
//! pending plans, all atomically from the caller's point of view.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::host::HostFacts;
use nkudo_storage::microvm::MicroVmReport;
use nkudo_storage::models::{ConnectivityState, Plan};

use crate::error::HeartbeatError;

/// Maximum allowed forward clock skew before a heartbeat's `sent_at` is
/// rejected as stale (§4.4).
const MAX_FUTURE_SKEW: ChronoDuration = ChronoDuration::minutes(5);

/// Lower bound on the lease TTL handed to [`nkudo_storage::plan::lease_next_plans`]
/// regardless of the configured heartbeat interval (§4.3).
const MIN_LEASE_TTL_SECS: i64 = 60;

/// Maximum number of plans leased to one agent per heartbeat.
const MAX_PLANS_PER_HEARTBEAT: i64 = 10;

/// Everything one heartbeat call reports about its host and fleet view.
pub struct HeartbeatRequest {
    pub tenant_id: Uuid,
    pub site_id: Uuid,
    pub host_id: Uuid,
    pub agent_id: Uuid,
    /// The certificate serial the caller authenticated with, read off the
    /// mTLS handshake by the transport layer.
    pub presented_cert_serial: String,
    pub sent_at: DateTime<Utc>,
    pub host_facts: HostFacts,
    pub vms: Vec<MicroVmReport>,
}

/// What the heartbeat handler hands back to the agent.
pub struct HeartbeatResponse {
    pub next_heartbeat_seconds: u32,
    pub pending_plans: Vec<Plan>,
    pub site_connectivity: ConnectivityState,
}

/// Process one heartbeat end to end.
///
/// # Errors
///
/// Returns [`HeartbeatError::Stale`] if `sent_at` is more than 5 minutes in
/// the future, [`HeartbeatError::CertMismatch`] if the presented
/// certificate serial does not match the agent's current `cert_serial`, or
/// [`HeartbeatError::AgentNotFound`] if the agent does not exist.
pub async fn process_heartbeat(
    pool: &PgPool,
    base_heartbeat_interval_secs: u32,
    request: HeartbeatRequest,
    now: DateTime<Utc>,
) -> Result<HeartbeatResponse, HeartbeatError> {
    if request.sent_at - now > MAX_FUTURE_SKEW {
        return Err(HeartbeatError::Stale);
    }

    let agent = nkudo_storage::agent::get_agent(pool, request.tenant_id, request.agent_id).await?;

    match &agent.cert_serial {
        Some(serial) if *serial == request.presented_cert_serial => {}
        _ => return Err(HeartbeatError::CertMismatch),
    }

    nkudo_storage::host::touch_host_facts(pool, request.tenant_id, request.host_id, &request.host_facts, now)
        .await?;

    nkudo_storage::agent::record_heartbeat(pool, request.tenant_id, request.agent_id, now).await?;

    for vm in &request.vms {
        nkudo_storage::microvm::reconcile_vm(pool, request.tenant_id, request.site_id, request.host_id, vm, now)
            .await?;
    }

    let site_connectivity =
        nkudo_storage::site::recompute_connectivity_state(pool, request.tenant_id, request.site_id, now).await?;

    let lease_ttl_secs = (i64::from(base_heartbeat_interval_secs) * 2).max(MIN_LEASE_TTL_SECS);
    let pending_plans = nkudo_storage::plan::lease_next_plans(
        pool,
        request.tenant_id,
        request.site_id,
        request.agent_id,
        MAX_PLANS_PER_HEARTBEAT,
        lease_ttl_secs,
        now,
    )
    .await?;

    let next_heartbeat_seconds = back_pressure(base_heartbeat_interval_secs, pending_plans.len());

    Ok(HeartbeatResponse {
        next_heartbeat_seconds,
        pending_plans,
        site_connectivity,
    })
}

/// Back-pressure rule for `next_heartbeat_seconds` (§4.4): shorten the
/// interval when there is outstanding work so the agent comes back sooner,
/// otherwise hold steady at the configured base interval.
fn back_pressure(base_interval_secs: u32, pending_plan_count: usize) -> u32 {
    if pending_plan_count > 0 {
        (base_interval_secs / 2).max(5)
    } else {
        base_interval_secs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn back_pressure_holds_steady_with_no_work() {
        assert_eq!(back_pressure(30, 0), 30);
    }

    #[test]
    fn back_pressure_halves_interval_when_work_is_pending() {
        assert_eq!(back_pressure(30, 1), 15);
        assert_eq!(back_pressure(30, 7), 15);
    }

    #[test]
    fn back_pressure_never_drops_below_floor() {
        assert_eq!(back_pressure(6, 1), 5);
    }
}
