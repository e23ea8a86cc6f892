//! The one multi-table write of the enrollment pipeline (§4.2 step 2) that
//! genuinely needs a single transaction: token consumption, host upsert,
//! agent upsert, and certificate-history recording all succeed or all roll
//! back together. Everything else in this crate is one table at a time;
//! this module is the exception, grounded on `plan::submit_plan`'s
//! multi-insert transaction shape.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::host::HostFacts;
use crate::models::{Agent, CertificateHistoryEntry, Host};

/// Outcome of attempting to consume a token: distinguishes "consumed here"
/// from "already used" so the caller maps to the right error code without
/// a second round trip.
pub enum TokenConsumption {
    Consumed,
    AlreadyUsed,
}

/// Atomically: mark the token used (no-op failure if already used), upsert
/// the host, upsert the agent, and record the freshly issued certificate in
/// history. Returns `None` in the tuple's first slot if the token had
/// already been consumed by a concurrent request — in that case no other
/// write happens and the caller must treat it as `TOKEN_USED`.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
#[allow(clippy::too_many_arguments)]
pub async fn complete_enrollment(
    pool: &PgPool,
    token_id: Uuid,
    tenant_id: Uuid,
    site_id: Uuid,
    hostname: &str,
    host_facts: &HostFacts,
    refresh_token_hash: &str,
    agent_version: &str,
    os: &str,
    arch: &str,
    cert_serial: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(TokenConsumption, Host, Agent, CertificateHistoryEntry), StoreError> {
    let mut tx = pool.begin().await?;

    let token_rows = sqlx::query(
        "UPDATE enrollment_tokens SET used_at = $1 WHERE id = $2 AND used_at IS NULL",
    )
    .bind(now)
    .bind(token_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if token_rows == 0 {
        tx.rollback().await?;
        return Err(StoreError::Conflict("enrollment token already used".to_owned()));
    }

    let host = sqlx::query_as::<_, Host>(
        r"
        INSERT INTO hosts (
            tenant_id, site_id, hostname, cpu_cores_total, memory_bytes_total,
            storage_bytes_total, kvm_available, hypervisor_available, last_facts_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (tenant_id, site_id, hostname) DO UPDATE SET
            cpu_cores_total = excluded.cpu_cores_total,
            memory_bytes_total = excluded.memory_bytes_total,
            storage_bytes_total = excluded.storage_bytes_total,
            kvm_available = excluded.kvm_available,
            hypervisor_available = excluded.hypervisor_available,
            last_facts_at = excluded.last_facts_at
        RETURNING id, tenant_id, site_id, hostname, cpu_cores_total,
                  memory_bytes_total, storage_bytes_total, kvm_available,
                  hypervisor_available, last_facts_at, created_at
        ",
    )
    .bind(tenant_id)
    .bind(site_id)
    .bind(hostname)
    .bind(host_facts.cpu_cores_total)
    .bind(host_facts.memory_bytes_total)
    .bind(host_facts.storage_bytes_total)
    .bind(host_facts.kvm_available)
    .bind(host_facts.hypervisor_available)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

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
    .bind(host.id)
    .bind(refresh_token_hash)
    .bind(agent_version)
    .bind(os)
    .bind(arch)
    .fetch_one(&mut *tx)
    .await?;

    let cert_history = sqlx::query_as::<_, CertificateHistoryEntry>(
        r"
        INSERT INTO certificate_history (tenant_id, agent_id, serial, issued_at, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, tenant_id, agent_id, serial, issued_at, expires_at, revoked_at
        ",
    )
    .bind(tenant_id)
    .bind(agent.id)
    .bind(cert_serial)
    .bind(issued_at)
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE agents SET cert_serial = $1 WHERE id = $2 AND tenant_id = $3")
        .bind(cert_serial)
        .bind(agent.id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let agent = Agent {
        cert_serial: Some(cert_serial.to_owned()),
        ..agent
    };

    Ok((TokenConsumption::Consumed, host, agent, cert_history))
}
