//! Host repository functions.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Host;

/// Facts reported about a host, as carried by enrollment and heartbeat.
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub cpu_cores_total: i32,
    pub memory_bytes_total: i64,
    pub storage_bytes_total: i64,
    pub kvm_available: bool,
    pub hypervisor_available: bool,
}

/// Upsert a host by `(tenant_id, site_id, hostname)`, refreshing its facts
/// and `last_facts_at`.
///
/// # Errors
///
/// Returns [`StoreError::Internal`] on a database failure.
pub async fn upsert_host(
    pool: &PgPool,
    tenant_id: Uuid,
    site_id: Uuid,
    hostname: &str,
    facts: &HostFacts,
    observed_at: DateTime<Utc>,
) -> Result<Host, StoreError> {
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
    .bind(facts.cpu_cores_total)
    .bind(facts.memory_bytes_total)
    .bind(facts.storage_bytes_total)
    .bind(facts.kvm_available)
    .bind(facts.hypervisor_available)
    .bind(observed_at)
    .fetch_one(pool)
    .await?;

    Ok(host)
}

/// Refresh only `last_facts_at` and the resource columns for an existing
/// host, used on every heartbeat.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if the host does not exist.
pub async fn touch_host_facts(
    pool: &PgPool,
    tenant_id: Uuid,
    host_id: Uuid,
    facts: &HostFacts,
    observed_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        UPDATE hosts SET
            cpu_cores_total = $1, memory_bytes_total = $2, storage_bytes_total = $3,
            kvm_available = $4, hypervisor_available = $5, last_facts_at = $6
        WHERE id = $7 AND tenant_id = $8
        ",
    )
    .bind(facts.cpu_cores_total)
    .bind(facts.memory_bytes_total)
    .bind(facts.storage_bytes_total)
    .bind(facts.kvm_available)
    .bind(facts.hypervisor_available)
    .bind(observed_at)
    .bind(host_id)
    .bind(tenant_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("host {host_id} not found")));
    }
    Ok(())
}

/// Fetch a host scoped to its tenant.
///
/// # Errors
///
/// Returns [`StoreError::NotFound`] if no such host exists.
pub async fn get_host(pool: &PgPool, tenant_id: Uuid, host_id: Uuid) -> Result<Host, StoreError> {
    let host = sqlx::query_as::<_, Host>(
        r"
        SELECT id, tenant_id, site_id, hostname, cpu_cores_total, memory_bytes_total,
               storage_bytes_total, kvm_available, hypervisor_available, last_facts_at, created_at
        FROM hosts WHERE id = $1 AND tenant_id = $2
        ",
    )
    .bind(host_id)
    .bind(tenant_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("host {host_id} not found")))?;

    Ok(host)
}
