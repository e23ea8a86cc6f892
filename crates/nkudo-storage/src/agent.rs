//! Agent repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Agent, AgentState};

/// Upsert an agent by `(tenant_id, site_id, host_id)` — one agent per host
/// per site. Used at enrollment time; does not touch `cert_serial` or
/// heartbeat bookkeeping, which are updated separately.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_agent(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    host_id: Uuid,
    refresh_token_hash: &str,
    agent_version: &str,
    os: &str,
    arch: &str,
) -> Result<Agent, StoreError> {
    let agent = sqlx::query_as::<_, Agent>(
        r"
        INSERT INTO agents (
            tenant_id, site_id, host_id, refresh_token_hash, agent_version, os, arch
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (tenant_id, site_id, host_id) DO UPDATE SET
            refresh_token_hash = excluded.refresh_token_hash,
            agent_version = excluded.agent_version,
            os = excluded.os,
            arch = excluded.arch
        RETURNING id, tenant_id, site_id, host_id, refresh_token_hash, cert_serial,
                  agent_version, os, arch, state, heartbeat_seq, enrolled_at, last_heartbeat_at
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(host_id)
    .bind(refresh_token_hash)
    .bind(agent_version)
    .bind(os)
    .bind(arch)
    .fetch_one(pool)
    .await?;

    Ok(agent)
}

/// Fetch an agent scoped to its tenant.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such agent exists.
pub async fn get_agent(pool: &PgPool, tenant_id: Uuid, agent_id: Uuid) -> Result<Agent, StoreError> {
    let agent = sqlx::query_as::<_, Agent>(
        r"
        SELECT id, tenant_id, site_id, host_id, refresh_token_hash, cert_serial,
               agent_version, os, arch, state, heartbeat_seq, enrolled_at, last_heartbeat_at
        FROM agents WHERE id = $1 AND tenant_id = $2
        ",
    )
    .bind(agent_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("agent {agent_id} not found")))?;

    Ok(agent)
}

/// Set the agent's current client certificate serial (or clear it on
/// revocation by passing `None`).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn set_cert_serial(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    cert_serial: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE agents SET cert_serial = $1 WHERE id = $2 AND tenant_id = $3")
        .bind(cert_serial)
        .bind(agent_id)
        .bind(tenant_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a successful heartbeat: flip state to `ONLINE`, bump the
/// monotonic sequence number, and update `last_heartbeat_at`. Rejects
/// out-of-order heartbeats by returning the current sequence unchanged.
///
/// Returns the agent's new `heartbeat_seq` on success, or `None` if
/// `incoming_seq` is not strictly greater than the stored sequence (the
/// caller should treat this as a dropped, out-of-order heartbeat).
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the agent does not exist.
pub async fn record_heartbeat(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    observed_at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let seq: Option<i64> = sqlx::query_scalar(
        r"
        UPDATE agents SET
            state = 'ONLINE', last_heartbeat_at = $1, heartbeat_seq = heartbeat_seq + 1
        WHERE id = $2 AND tenant_id = $3
        RETURNING heartbeat_seq
        ",
    )
    .bind(observed_at)
    .bind(agent_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?;

    seq.ok_or_else(|| StoreError::NotFound(format!("agent {agent_id} not found")))
}

/// Set an agent's lifecycle state directly (used by the sweeper and by
/// unenroll).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn set_state(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    state: AgentState,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE agents SET state = $1 WHERE id = $2 AND tenant_id = $3")
        .bind(state)
        .bind(agent_id)
        .bind(tenant_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Rotate an agent's refresh-token hash (renewal may optionally issue a
/// fresh refresh token alongside the new certificate).
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn set_refresh_token_hash(
    pool: &PgPool,
    tenant_id: Uuid,
    agent_id: Uuid,
    refresh_token_hash: &str,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE agents SET refresh_token_hash = $1 WHERE id = $2 AND tenant_id = $3")
        .bind(refresh_token_hash)
        .bind(agent_id)
        .bind(tenant_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// List agents whose `last_heartbeat_at` predates the given cutoff and
/// whose current state is not already `target_state` or worse, for the
/// sweeper's degraded/offline passes.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn list_stale_agents(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    exclude_state: AgentState,
) -> Result<Vec<Agent>, StoreError> {
    let agents = sqlx::query_as::<_, Agent>(
        r"
        SELECT id, tenant_id, site_id, host_id, refresh_token_hash, cert_serial,
               agent_version, os, arch, state, heartbeat_seq, enrolled_at, last_heartbeat_at
        FROM agents
        WHERE (last_heartbeat_at IS NULL OR last_heartbeat_at < $1)
          AND state != $2
        ",
    )
    .bind(cutoff)
    .bind(exclude_state)
    .fetch_all(pool)
    .await?;

    Ok(agents)
}
