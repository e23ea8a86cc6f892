//! Offline sweeper (§4.5): a single-leader periodic task that demotes
//! unresponsive agents, reclaims their leases, and reconciles site
//! connectivity, independent of any inbound heartbeat.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use nkudo_storage::models::{ActorType, AgentState};

use crate::audit::{self, AuditEventInput};
use crate::error::SweeperError;

/// Leader-lease id the sweeper contends for so exactly one server instance
/// runs it at a time.
pub const SWEEPER_LEASE_ID: &str = "sweeper";

/// How long a held sweeper lease is valid for before another instance may
/// claim it, if the holder stops renewing.
pub const SWEEPER_LEASE_TTL_SECS: i64 = 30;

/// An agent is marked `DEGRADED` after missing heartbeats for this long.
pub const DEGRADED_AFTER: ChronoDuration = ChronoDuration::seconds(3 * 60);

/// An agent is marked `OFFLINE` (and its leases reclaimed) after missing
/// heartbeats for this long.
pub const OFFLINE_AFTER: ChronoDuration = ChronoDuration::seconds(15 * 60);

/// Tally of one sweep pass, for logging.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub degraded: u64,
    pub offlined: u64,
    pub leases_cleared: u64,
    pub sites_recomputed: u64,
}

/// Run one sweep pass unconditionally — callers that want leader election
/// should gate this behind [`run_if_leader`].
///
/// # Errors
///
/// Returns [`SweeperError::Storage`] on a database failure.
pub async fn sweep_once(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepReport, SweeperError> {
    let mut report = SweepReport::default();
    let mut touched_sites: std::collections::HashSet<(Uuid, Uuid)> = std::collections::HashSet::new();

    let degraded_cutoff = now - DEGRADED_AFTER;
    let newly_degraded =
        nkudo_storage::agent::list_stale_agents(pool, degraded_cutoff, AgentState::Degraded).await?;
    let offline_cutoff = now - OFFLINE_AFTER;
    let already_offline: std::collections::HashSet<Uuid> =
        nkudo_storage::agent::list_stale_agents(pool, offline_cutoff, AgentState::Offline)
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();

    for agent in newly_degraded {
        if already_offline.contains(&agent.id) || agent.state == AgentState::Degraded {
            continue;
        }
        nkudo_storage::agent::set_state(pool, agent.tenant_id, agent.id, AgentState::Degraded).await?;
        report.degraded += 1;
        touched_sites.insert((agent.tenant_id, agent.site_id));
        emit_state_change(pool, &agent.tenant_id, agent.site_id, agent.id, "AGENT_DEGRADED", now).await?;
    }

    let newly_offline =
        nkudo_storage::agent::list_stale_agents(pool, offline_cutoff, AgentState::Offline).await?;
    for agent in newly_offline {
        nkudo_storage::agent::set_state(pool, agent.tenant_id, agent.id, AgentState::Offline).await?;
        report.offlined += 1;
        touched_sites.insert((agent.tenant_id, agent.site_id));
        let cleared = nkudo_storage::plan::clear_leases_for_agent(pool, agent.tenant_id, agent.id).await?;
        report.leases_cleared += cleared;
        emit_state_change(pool, &agent.tenant_id, agent.site_id, agent.id, "AGENT_OFFLINE", now).await?;
    }

    let expired_plan_leases = nkudo_storage::plan::clear_expired_leases(pool, now).await?;
    report.leases_cleared += expired_plan_leases;

    let sites: Vec<(Uuid, Uuid)> = touched_sites.into_iter().collect();
    report.sites_recomputed = recompute_sites(pool, &sites, now).await?;

    Ok(report)
}

async fn emit_state_change(
    pool: &PgPool,
    tenant_id: &Uuid,
    site_id: Uuid,
    agent_id: Uuid,
    action: &str,
    now: DateTime<Utc>,
) -> Result<(), SweeperError> {
    audit::append_event(
        pool,
        AuditEventInput {
            tenant_id: *tenant_id,
            site_id: Some(site_id),
            actor_type: ActorType::System,
            actor_ref: "sweeper".to_owned(),
            action: action.to_owned(),
            resource_type: "agent".to_owned(),
            resource_id: agent_id.to_string(),
            occurred_at: now,
        },
    )
    .await
    .map_err(|e| SweeperError::Storage(nkudo_storage::StoreError::Internal(e.to_string())))?;
    Ok(())
}

/// Re-run [`nkudo_storage::site::recompute_connectivity_state`] for every
/// site touched by this sweep, so a site's aggregate connectivity reflects
/// agents that were just demoted. Takes the distinct `(tenant_id, site_id)`
/// pairs affected by a sweep rather than scanning every site in the fleet.
///
/// # Errors
///
/// Returns [`SweeperError::Storage`] on a database failure.
pub async fn recompute_sites(
    pool: &PgPool,
    sites: &[(Uuid, Uuid)],
    now: DateTime<Utc>,
) -> Result<u64, SweeperError> {
    let mut count = 0u64;
    for (tenant_id, site_id) in sites {
        nkudo_storage::site::recompute_connectivity_state(pool, *tenant_id, *site_id, now).await?;
        count += 1;
    }
    Ok(count)
}

/// Attempt to acquire or renew the sweeper's leader lease and, if held, run
/// one sweep pass. Returns `None` if this instance is not the leader.
///
/// # Errors
///
/// Returns [`SweeperError::Storage`] on a database failure.
pub async fn run_if_leader(
    pool: &PgPool,
    holder_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<SweepReport>, SweeperError> {
    let is_leader =
        nkudo_storage::leader_lease::try_acquire(pool, SWEEPER_LEASE_ID, holder_id, SWEEPER_LEASE_TTL_SECS, now)
            .await?;
    if !is_leader {
        return Ok(None);
    }
    sweep_once(pool, now).await.map(Some)
}

/// Release the sweeper lease on graceful shutdown so the next leader
/// election does not have to wait out the full TTL.
///
/// # Errors
///
/// Returns [`SweeperError::Storage`] on a database failure.
pub async fn release_leadership(pool: &PgPool, holder_id: &str) -> Result<(), SweeperError> {
    nkudo_storage::leader_lease::release(pool, SWEEPER_LEASE_ID, holder_id).await?;
    Ok(())
}
